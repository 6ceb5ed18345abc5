//! Async delivery of converted frames.
//!
//! The router owns the sink list for a session. Each frame coming off the
//! bridge is offered to every sink at once, and a frame only counts as
//! delivered after all sinks have had their turn.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::session::SessionState;
use crate::sink::Sink;
use crate::{EventCallback, Frame, MediaError, MediaEvent, PipelineConfig, SinkError};

/// Control messages for a running [`Router`].
pub enum RouterCommand {
    /// Flush what the frame channel still holds, then shut the sinks down.
    Stop,
}

/// Sink fan-out for one session.
pub struct Router {
    sinks: Vec<Arc<dyn Sink>>,
    event_callback: Option<EventCallback>,
    config: PipelineConfig,
    state: Option<Arc<SessionState>>,
}

impl Router {
    pub fn new(sinks: Vec<Arc<dyn Sink>>, config: PipelineConfig) -> Self {
        Self {
            sinks,
            event_callback: None,
            config,
            state: None,
        }
    }

    /// Sink failures are reported through `callback` when one is given.
    pub fn with_event_callback(mut self, callback: Option<EventCallback>) -> Self {
        self.event_callback = callback;
        self
    }

    /// Delivery counters of `state` are bumped once per routed frame.
    pub fn with_state(mut self, state: Arc<SessionState>) -> Self {
        self.state = Some(state);
        self
    }

    fn report(&self, sink: &dyn Sink, error: String) {
        if let Some(callback) = &self.event_callback {
            callback(MediaEvent::SinkError {
                sink_name: sink.name().to_string(),
                error,
            });
        }
    }

    /// Hands `frame` to one sink, backing off between failed attempts.
    ///
    /// Every failure is reported. A closed sink, or any other error that
    /// cannot succeed on replay, ends the attempts at once.
    async fn deliver(&self, sink: &Arc<dyn Sink>, frame: &Frame) {
        let attempts = self.config.sink_retry_attempts.max(1);
        let mut backoff = self.config.sink_retry_delay;

        for attempt in 1..=attempts {
            let err: SinkError = match sink.write(frame).await {
                Ok(()) => return,
                Err(err) => err,
            };
            tracing::debug!(sink = sink.name(), attempt, error = %err, "sink write failed");
            self.report(sink.as_ref(), err.to_string());

            if !err.is_retryable() || attempt == attempts {
                break;
            }
            tokio::time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2).min(Duration::from_secs(60));
        }
    }

    /// Offers `frame` to all sinks concurrently and waits for each of them.
    pub async fn write_frame(&self, frame: &Frame) {
        futures::future::join_all(self.sinks.iter().map(|sink| self.deliver(sink, frame))).await;

        let Some(state) = &self.state else { return };
        state.frames_delivered.fetch_add(1, Ordering::SeqCst);
        state
            .bytes_delivered
            .fetch_add(frame.byte_len() as u64, Ordering::SeqCst);
    }

    /// Calls `on_start` on the sinks in registration order.
    ///
    /// The first sink that refuses aborts the sequence; its name and reason
    /// end up in the returned error.
    pub async fn start_sinks(&self) -> Result<(), MediaError> {
        for sink in &self.sinks {
            if let Err(e) = sink.on_start().await {
                return Err(MediaError::SinkStartFailed {
                    sink_name: sink.name().to_string(),
                    reason: e.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Calls `on_stop` on every sink. Failures are reported, not returned.
    pub async fn stop_sinks(&self) {
        for sink in &self.sinks {
            if let Err(e) = sink.on_stop().await {
                self.report(sink.as_ref(), format!("error during shutdown: {e}"));
            }
        }
    }

    async fn flush(&self, frame_rx: &mut mpsc::Receiver<Frame>) {
        let mut flushed = 0usize;
        while let Ok(frame) = frame_rx.try_recv() {
            self.write_frame(&frame).await;
            flushed += 1;
        }
        tracing::trace!(flushed, "router flushed queued frames");
    }

    /// Task body. Returns once `Stop` is handled or both channels are gone,
    /// with the sinks stopped either way.
    pub async fn run(
        self,
        mut frame_rx: mpsc::Receiver<Frame>,
        mut cmd_rx: mpsc::Receiver<RouterCommand>,
    ) {
        loop {
            tokio::select! {
                Some(frame) = frame_rx.recv() => self.write_frame(&frame).await,
                Some(RouterCommand::Stop) = cmd_rx.recv() => {
                    self.flush(&mut frame_rx).await;
                    break;
                }
                else => break,
            }
        }

        self.stop_sinks().await;
        tracing::debug!(sinks = self.sinks.len(), "router stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AudioFormat, SinkError};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct TestSink {
        name: String,
        write_count: AtomicUsize,
        fail_count: AtomicUsize,
        closed: bool,
    }

    impl TestSink {
        fn new(name: &str) -> Self {
            Self::failing(name, 0)
        }

        fn failing(name: &str, fail_times: usize) -> Self {
            Self {
                name: name.to_string(),
                write_count: AtomicUsize::new(0),
                fail_count: AtomicUsize::new(fail_times),
                closed: false,
            }
        }

        fn closed(name: &str) -> Self {
            Self {
                closed: true,
                ..Self::failing(name, usize::MAX)
            }
        }

        fn writes(&self) -> usize {
            self.write_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Sink for TestSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn write(&self, _frame: &Frame) -> Result<(), SinkError> {
            if self.closed {
                return Err(SinkError::Closed);
            }
            let remaining = self.fail_count.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_count.fetch_sub(1, Ordering::SeqCst);
                return Err(SinkError::write_failed("intentional failure"));
            }
            self.write_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn frame() -> Frame {
        Frame::from_bytes(vec![0; 320], AudioFormat::linear(16000.0, 16, 1))
    }

    fn fast_retries() -> PipelineConfig {
        PipelineConfig {
            sink_retry_delay: Duration::from_millis(1),
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_router_writes_to_all_sinks() {
        let sink1 = Arc::new(TestSink::new("sink1"));
        let sink2 = Arc::new(TestSink::new("sink2"));
        let state = Arc::new(SessionState::new());
        let router = Router::new(vec![sink1.clone(), sink2.clone()], PipelineConfig::default())
            .with_state(state.clone());

        router.write_frame(&frame()).await;

        assert_eq!(sink1.writes(), 1);
        assert_eq!(sink2.writes(), 1);
        assert_eq!(state.frames_delivered.load(Ordering::SeqCst), 1);
        assert_eq!(state.bytes_delivered.load(Ordering::SeqCst), 320);
    }

    #[tokio::test]
    async fn test_router_retries_on_failure() {
        // fails twice, succeeds on the third attempt
        let sink = Arc::new(TestSink::failing("sink", 2));
        let router = Router::new(vec![sink.clone()], fast_retries());
        router.write_frame(&frame()).await;
        assert_eq!(sink.writes(), 1);
    }

    #[tokio::test]
    async fn test_router_does_not_retry_closed_sink() {
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = errors.clone();
        let sink = Arc::new(TestSink::closed("gone"));
        let router = Router::new(vec![sink], fast_retries()).with_event_callback(Some(
            crate::event_callback(move |event| {
                if matches!(event, MediaEvent::SinkError { .. }) {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }),
        ));
        router.write_frame(&frame()).await;
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_router_run_drains_on_stop() {
        let sink = Arc::new(TestSink::new("sink"));
        let router = Router::new(vec![sink.clone()], PipelineConfig::default());

        let (frame_tx, frame_rx) = mpsc::channel(10);
        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        frame_tx.send(frame()).await.unwrap();
        frame_tx.send(frame()).await.unwrap();
        cmd_tx.send(RouterCommand::Stop).await.unwrap();

        router.run(frame_rx, cmd_rx).await;
        assert_eq!(sink.writes(), 2);
    }

    #[tokio::test]
    async fn test_router_run_exits_when_channels_close() {
        let sink = Arc::new(TestSink::new("sink"));
        let router = Router::new(vec![sink.clone()], PipelineConfig::default());

        let (frame_tx, frame_rx) = mpsc::channel(4);
        let (cmd_tx, cmd_rx) = mpsc::channel::<RouterCommand>(1);
        frame_tx.send(frame()).await.unwrap();
        drop(frame_tx);
        drop(cmd_tx);

        router.run(frame_rx, cmd_rx).await;
        assert_eq!(sink.writes(), 1);
    }
}
