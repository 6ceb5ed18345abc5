//! Running pipeline management.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::pipeline::{Bridge, RouterCommand};
use crate::source::DataSource;
use crate::stream::{
    find_buffer_control, find_rewritable_control, BufferControl, Control, RewritableControl,
};
use crate::MediaError;

/// Statistics about a running pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames read from the outermost streams.
    pub frames_read: u64,
    /// Frames written to the sinks.
    pub frames_delivered: u64,
    /// Payload bytes written to the sinks.
    pub bytes_delivered: u64,
    /// Frames dropped because the router channel was full.
    pub frames_dropped: u64,
    /// Reads that failed.
    pub read_errors: u64,
}

/// Internal state shared between the session, the bridges and the router.
pub(crate) struct SessionState {
    pub running: AtomicBool,
    pub ended: AtomicBool,
    pub frames_read: AtomicU64,
    pub frames_delivered: AtomicU64,
    pub bytes_delivered: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub read_errors: AtomicU64,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            ended: AtomicBool::new(false),
            frames_read: AtomicU64::new(0),
            frames_delivered: AtomicU64::new(0),
            bytes_delivered: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            read_errors: AtomicU64::new(0),
        }
    }
}

/// Handle to a running pipeline.
///
/// Returned by [`MediaPipelineBuilder::start()`]. Frames flow until
/// [`stop()`](Session::stop) is called or the `Session` is dropped.
///
/// # Lifecycle
///
/// 1. Created by [`MediaPipelineBuilder::start()`]
/// 2. The source runs; every frame reaching the outermost stream goes to the
///    sinks
/// 3. Call [`stop()`](Session::stop) for graceful shutdown
/// 4. Dropping the `Session` also stops the source (prefer explicit `stop()`)
///
/// [`MediaPipelineBuilder::start()`]: crate::MediaPipelineBuilder::start
pub struct Session {
    state: Arc<SessionState>,
    router_cmd_tx: mpsc::Sender<RouterCommand>,
    router_handle: Option<JoinHandle<()>>,
    source: Arc<dyn DataSource>,
    bridges: Vec<Bridge>,
    controls: Vec<Control>,
}

impl Session {
    pub(crate) fn new(
        state: Arc<SessionState>,
        router_cmd_tx: mpsc::Sender<RouterCommand>,
        router_handle: JoinHandle<()>,
        source: Arc<dyn DataSource>,
        bridges: Vec<Bridge>,
        controls: Vec<Control>,
    ) -> Self {
        Self {
            state,
            router_cmd_tx,
            router_handle: Some(router_handle),
            source,
            bridges,
            controls,
        }
    }

    /// Returns `true` until the session is stopped.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Returns `true` once an end-of-media frame was read.
    pub fn is_ended(&self) -> bool {
        self.state.ended.load(Ordering::SeqCst)
    }

    /// Returns current statistics.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            frames_read: self.state.frames_read.load(Ordering::SeqCst),
            frames_delivered: self.state.frames_delivered.load(Ordering::SeqCst),
            bytes_delivered: self.state.bytes_delivered.load(Ordering::SeqCst),
            frames_dropped: self.state.frames_dropped.load(Ordering::SeqCst),
            read_errors: self.state.read_errors.load(Ordering::SeqCst),
        }
    }

    /// Controls exposed by the outermost streams.
    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    /// The frame cache's buffering control, if the pipeline has a cache.
    pub fn buffer_control(&self) -> Option<Arc<BufferControl>> {
        find_buffer_control(&self.controls)
    }

    /// The mute/DTMF control, if the pipeline is rewritable.
    pub fn rewritable_control(&self) -> Option<Arc<RewritableControl>> {
        find_rewritable_control(&self.controls)
    }

    /// Gracefully stops the pipeline.
    ///
    /// This will:
    /// 1. Stop the source and detach from its streams
    /// 2. Deliver frames already queued for the sinks
    /// 3. Call `on_stop()` on all sinks
    /// 4. Disconnect the source
    ///
    /// # Errors
    ///
    /// Returns the source's stop error, after shutdown has completed.
    pub async fn stop(mut self) -> Result<(), MediaError> {
        self.stop_internal().await
    }

    async fn stop_internal(&mut self) -> Result<(), MediaError> {
        if !self.state.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        // stopping a pull adapter may wait for its reader thread
        let source = self.source.clone();
        let stopped = tokio::task::spawn_blocking(move || source.stop())
            .await
            .unwrap_or_else(|e| Err(MediaError::Backend(format!("stop task failed: {e}"))));
        for bridge in &self.bridges {
            bridge.detach();
        }

        let _ = self.router_cmd_tx.send(RouterCommand::Stop).await;
        if let Some(handle) = self.router_handle.take() {
            let _ = handle.await;
        }

        self.source.disconnect();
        tracing::info!(stats = ?self.stats(), "pipeline stopped");
        stopped
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state.running.swap(false, Ordering::SeqCst) {
            for bridge in &self.bridges {
                bridge.detach();
            }
            let _ = self.router_cmd_tx.try_send(RouterCommand::Stop);
            let _ = self.source.stop();
            self.source.disconnect();
        }
    }
}
