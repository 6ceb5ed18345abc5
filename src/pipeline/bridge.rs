//! Moves frames from a push stream onto the router channel.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::event::{emit, EventCallback, MediaEvent};
use crate::session::SessionState;
use crate::stream::{transfer_handler, PushStream};
use crate::Frame;

/// Settings for one bridge.
#[derive(Clone)]
pub(crate) struct BridgeConfig {
    /// Name used in logs and events.
    pub name: String,
    /// Byte capacity handed to each read, or `None` to let the stream size
    /// the frame.
    pub read_size: Option<usize>,
    /// Capacity of the router channel, reported when it overflows.
    pub channel_capacity: usize,
}

/// Registers itself as the transfer handler of a push stream.
///
/// Every notification reads one frame on the producer's thread and hands it
/// to the router with `try_send`. A full channel drops the frame and counts
/// it; the producer is never held up here.
pub(crate) struct Bridge {
    stream: Arc<dyn PushStream>,
}

impl Bridge {
    pub fn attach(
        stream: Arc<dyn PushStream>,
        frame_tx: mpsc::Sender<Frame>,
        state: Arc<SessionState>,
        config: BridgeConfig,
        events: Option<EventCallback>,
    ) -> Self {
        let handler = transfer_handler(move |source| {
            let mut frame = match config.read_size {
                Some(size) => Frame::with_byte_capacity(size),
                None => Frame::new(),
            };
            if let Err(e) = source.read(&mut frame) {
                state.read_errors.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(bridge = %config.name, error = %e, "pipeline read failed");
                emit(
                    events.as_ref(),
                    MediaEvent::ReadFailed {
                        stream: config.name.clone(),
                        error: e.to_string(),
                    },
                );
                return;
            }
            if frame.is_discard() || (frame.length == 0 && !frame.is_eom()) {
                return;
            }
            if frame.is_eom() {
                tracing::debug!(bridge = %config.name, "end of media");
                state.ended.store(true, Ordering::SeqCst);
            }

            let frames = state.frames_read.fetch_add(1, Ordering::SeqCst);
            if frames % 50 == 0 {
                tracing::debug!(
                    bridge = %config.name,
                    frames,
                    bytes = frame.byte_len(),
                    timestamp = frame.timestamp,
                    "frame read"
                );
            }

            match frame_tx.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    let dropped = state.frames_dropped.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::trace!(
                        bridge = %config.name,
                        dropped,
                        "router channel full, frame dropped"
                    );
                    emit(
                        events.as_ref(),
                        MediaEvent::CacheFull {
                            entries: config.channel_capacity,
                        },
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::trace!(bridge = %config.name, "router gone, frame dropped");
                }
            }
        });
        stream.set_transfer_handler(Some(handler));
        Self { stream }
    }

    /// Stops receiving notifications.
    pub fn detach(&self) {
        self.stream.set_transfer_handler(None);
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.detach();
    }
}
