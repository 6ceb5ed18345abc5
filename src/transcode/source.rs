//! A data source whose tracks are converted to a target format.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::processor::{Processor, ProcessorOutput, ProcessorState};
use crate::codec::CodecRegistry;
use crate::error::MediaError;
use crate::event::EventCallback;
use crate::format::MediaFormat;
use crate::source::DataSource;
use crate::stream::StreamEndpoint;

/// Default bound on each processor state wait.
pub const DEFAULT_STATE_WAIT: Duration = Duration::from_secs(5);

struct Connection {
    processor: Arc<Processor>,
    output: Arc<ProcessorOutput>,
}

/// Wraps a data source and offers its tracks converted to `target`.
///
/// Tracks already in the target format, and tracks with no conversion to
/// it, are passed through unchanged. Every operation takes the same lock,
/// so the source can be driven from several threads.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use stream_media::codec::CodecRegistry;
/// use stream_media::source::{DataSource, MockDataSource, MockPushStream};
/// use stream_media::stream::StreamEndpoint;
/// use stream_media::transcode::TranscodingSource;
/// use stream_media::AudioFormat;
///
/// let input = Arc::new(MockDataSource::new(vec![StreamEndpoint::Push(Arc::new(
///     MockPushStream::new(AudioFormat::linear(48000.0, 16, 2)),
/// ))]));
/// let target = AudioFormat::linear(16000.0, 16, 1);
/// let source = TranscodingSource::new(input, target.clone(), CodecRegistry::with_defaults());
/// source.connect()?;
/// assert!(source.streams()[0].format().unwrap().matches(&target.into()));
/// source.disconnect();
/// # Ok::<(), stream_media::MediaError>(())
/// ```
pub struct TranscodingSource {
    input: Arc<dyn DataSource>,
    target: MediaFormat,
    registry: CodecRegistry,
    state_wait: Duration,
    strict_stop: bool,
    events: Option<EventCallback>,
    connection: Mutex<Option<Connection>>,
}

impl TranscodingSource {
    /// Creates a disconnected source converting `input` to `target`.
    pub fn new(
        input: Arc<dyn DataSource>,
        target: impl Into<MediaFormat>,
        registry: CodecRegistry,
    ) -> Self {
        Self {
            input,
            target: target.into(),
            registry,
            state_wait: DEFAULT_STATE_WAIT,
            strict_stop: false,
            events: None,
            connection: Mutex::new(None),
        }
    }

    /// Sets how long `connect` waits for each processor state.
    #[must_use]
    pub fn with_state_wait(mut self, wait: Duration) -> Self {
        self.state_wait = wait;
        self
    }

    /// Passes `strict_stop` to the pull stream adapters.
    #[must_use]
    pub fn with_strict_stop(mut self, strict_stop: bool) -> Self {
        self.strict_stop = strict_stop;
        self
    }

    /// Reports processor and stream events to `events`.
    #[must_use]
    pub fn with_events(mut self, events: EventCallback) -> Self {
        self.events = Some(events);
        self
    }

    /// The format tracks are converted to.
    pub fn target(&self) -> &MediaFormat {
        &self.target
    }

    /// Returns `true` between a successful `connect` and `disconnect`.
    pub fn is_connected(&self) -> bool {
        self.connection.lock().is_some()
    }

    /// The processor's current state, if connected.
    pub fn processor_state(&self) -> Option<ProcessorState> {
        self.connection.lock().as_ref().map(|c| c.processor.state())
    }

    fn negotiate(&self, processor: &Arc<Processor>) -> Result<Arc<ProcessorOutput>, MediaError> {
        processor.configure()?;
        processor.wait_for_state(ProcessorState::Configured, self.state_wait)?;

        for track in processor.track_controls() {
            let Some(current) = track.native_format() else {
                continue;
            };
            if current.matches(&self.target) {
                continue;
            }
            match track.set_format(&self.target) {
                Some(chosen) => {
                    tracing::debug!(from = %current, to = %chosen, "track format selected")
                }
                None => {
                    tracing::debug!(format = %current, "no conversion to the target format")
                }
            }
        }

        processor.realize()?;
        processor.wait_for_state(ProcessorState::Realized, self.state_wait)?;
        let output = processor
            .output()
            .ok_or_else(|| MediaError::unavailable("processor", "realized without an output"))?;
        output.connect()?;
        Ok(output)
    }
}

impl DataSource for TranscodingSource {
    fn connect(&self) -> Result<(), MediaError> {
        let mut connection = self.connection.lock();
        if connection.is_some() {
            return Ok(());
        }
        self.input.connect()?;

        let processor = Processor::with_options(
            self.input.clone(),
            self.registry.clone(),
            self.strict_stop,
            self.events.clone(),
        );
        match self.negotiate(&processor) {
            Ok(output) => {
                tracing::info!(target_format = %self.target, "transcoding source connected");
                *connection = Some(Connection { processor, output });
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "transcoding source failed to connect");
                processor.close();
                Err(e)
            }
        }
    }

    fn disconnect(&self) {
        let Some(connection) = self.connection.lock().take() else {
            return;
        };
        let _ = connection.output.stop();
        if let Err(e) = connection.processor.stop() {
            tracing::warn!(error = %e, "failed to stop input");
        }
        connection.output.disconnect();
        connection.processor.close();
        tracing::info!("transcoding source disconnected");
    }

    fn start(&self) -> Result<(), MediaError> {
        let connection = self.connection.lock();
        let connection = connection.as_ref().ok_or(MediaError::NotConnected)?;
        connection.processor.start()?;
        connection.output.start()
    }

    fn stop(&self) -> Result<(), MediaError> {
        let connection = self.connection.lock();
        let Some(connection) = connection.as_ref() else {
            return Ok(());
        };
        connection.output.stop()?;
        connection.processor.stop()
    }

    fn streams(&self) -> Vec<StreamEndpoint> {
        self.connection
            .lock()
            .as_ref()
            .map(|c| c.output.streams())
            .unwrap_or_default()
    }
}

impl Drop for TranscodingSource {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Codec, CodecProcessor, NegotiatedFormats, ProcessStatus, Transform};
    use crate::format::{encoding, AudioFormat, FormatFamily};
    use crate::frame::Frame;
    use crate::source::{MockDataSource, MockPushStream};
    use crate::stream::transfer_handler;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn linear(rate: f64, channels: u16) -> AudioFormat {
        AudioFormat::linear(rate, 16, channels)
    }

    fn source_of(streams: Vec<Arc<MockPushStream>>) -> Arc<MockDataSource> {
        Arc::new(MockDataSource::new(
            streams.into_iter().map(|s| StreamEndpoint::Push(s)).collect(),
        ))
    }

    #[test]
    fn test_connect_converts_tracks() {
        let upstream = Arc::new(MockPushStream::new(linear(48000.0, 2)));
        let input = source_of(vec![upstream.clone()]);
        let registry = CodecRegistry::with_defaults();
        let source = TranscodingSource::new(input.clone(), linear(16000.0, 1), registry);
        source.connect().unwrap();
        assert!(input.is_connected());
        assert_eq!(source.processor_state(), Some(ProcessorState::Realized));

        let streams = source.streams();
        assert_eq!(streams.len(), 1);
        let StreamEndpoint::Push(stream) = &streams[0] else {
            panic!("transcoded streams are push");
        };
        let (tx, rx) = std::sync::mpsc::channel();
        stream.set_transfer_handler(Some(transfer_handler(move |s| {
            let mut frame = Frame::new();
            if s.read(&mut frame).is_ok() {
                let _ = tx.send(frame);
            }
        })));
        source.start().unwrap();
        assert!(input.is_started());

        // 10ms of 48kHz stereo
        upstream.push_frame(Frame::from_bytes(vec![0; 1920], linear(48000.0, 2)));
        let frame = rx.recv().unwrap();
        assert_eq!(frame.length, 320);
        assert!(frame.format.unwrap().matches(&linear(16000.0, 1).into()));

        source.stop().unwrap();
        assert!(!input.is_started());
        source.disconnect();
        assert!(!input.is_connected());
        assert!(source.streams().is_empty());
    }

    #[test]
    fn test_frames_flow_only_while_started() {
        let upstream = Arc::new(MockPushStream::new(linear(48000.0, 1)));
        let source = TranscodingSource::new(
            source_of(vec![upstream.clone()]),
            linear(16000.0, 1),
            CodecRegistry::with_defaults(),
        );
        source.connect().unwrap();
        let StreamEndpoint::Push(stream) = &source.streams()[0] else {
            panic!("transcoded streams are push");
        };
        let notified = Arc::new(AtomicUsize::new(0));
        let n = notified.clone();
        stream.set_transfer_handler(Some(transfer_handler(move |_| {
            n.fetch_add(1, Ordering::SeqCst);
        })));

        upstream.push_frame(Frame::from_bytes(vec![0; 960], linear(48000.0, 1)));
        assert_eq!(notified.load(Ordering::SeqCst), 0);

        source.start().unwrap();
        upstream.push_frame(Frame::from_bytes(vec![0; 960], linear(48000.0, 1)));
        assert_eq!(notified.load(Ordering::SeqCst), 1);

        source.stop().unwrap();
        upstream.push_frame(Frame::from_bytes(vec![0; 960], linear(48000.0, 1)));
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_matching_track_passes_through() {
        let upstream = Arc::new(MockPushStream::new(linear(16000.0, 1)));
        let input = source_of(vec![upstream]);
        let source = TranscodingSource::new(input, linear(16000.0, 1), CodecRegistry::new());
        source.connect().unwrap();
        assert_eq!(source.streams()[0].format(), Some(linear(16000.0, 1).into()));
    }

    #[test]
    fn test_unconvertible_track_keeps_its_format() {
        let ulaw: MediaFormat = AudioFormat::new(encoding::ULAW).with_sample_rate(8000.0).into();
        let upstream = Arc::new(MockPushStream::new(ulaw.clone()));
        let source = TranscodingSource::new(
            source_of(vec![upstream]),
            linear(16000.0, 1),
            CodecRegistry::with_defaults(),
        );
        source.connect().unwrap();
        assert_eq!(source.streams()[0].format(), Some(ulaw));
    }

    #[test]
    fn test_connect_failure_leaves_nothing_connected() {
        let input = source_of(Vec::new());
        let registry = CodecRegistry::with_defaults();
        let source = TranscodingSource::new(input.clone(), linear(16000.0, 1), registry)
            .with_state_wait(Duration::from_secs(1));
        assert!(source.connect().is_err());
        assert!(!source.is_connected());
        assert!(!input.is_connected());
        assert!(source.streams().is_empty());
        assert!(matches!(source.start(), Err(MediaError::NotConnected)));
    }

    struct Failing;

    impl CodecProcessor for Failing {
        fn do_open(&mut self, _: &NegotiatedFormats) -> Result<(), MediaError> {
            Err(MediaError::unavailable("failing codec", "cannot open"))
        }

        fn do_process(
            &mut self,
            _: &NegotiatedFormats,
            _: &mut Frame,
            _: &mut Frame,
        ) -> ProcessStatus {
            ProcessStatus::FAILED
        }
    }

    #[test]
    fn test_realize_failure_is_reported() {
        let mut registry = CodecRegistry::new();
        registry.register(|| -> Box<dyn Transform> {
            Box::new(Codec::new(
                "failing codec",
                FormatFamily::Audio,
                vec![AudioFormat::new(encoding::LINEAR).into()],
                vec![AudioFormat::new(encoding::LINEAR).into()],
                Failing,
            ))
        });
        let input = source_of(vec![Arc::new(MockPushStream::new(linear(48000.0, 1)))]);
        let source = TranscodingSource::new(input.clone(), linear(16000.0, 1), registry);
        let err = source.connect().unwrap_err();
        assert!(matches!(err, MediaError::ResourceUnavailable { .. }));
        assert!(!input.is_connected());
    }
}
