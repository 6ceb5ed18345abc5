//! Runtime events for monitoring pipeline health.
//!
//! Events are non-fatal notifications. The pipeline keeps running after any
//! of them is emitted; they're for logging/metrics, not error handling.

use std::sync::Arc;

/// Why a silence-inserting transform did not fill a gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceSkipReason {
    /// The frame carried no timestamp; the baseline was cleared.
    UnknownTimestamp,
    /// First frame seen since construction or reset.
    FirstFrame,
    /// The gap exceeded the configured maximum.
    GapTooLarge,
}

/// Runtime events emitted by streams, transforms and pipelines.
///
/// # Example
///
/// ```
/// use stream_media::{MediaEvent, SilenceSkipReason};
///
/// fn handle_event(event: MediaEvent) {
///     match event {
///         MediaEvent::SilenceNotInserted { timestamp, reason } => {
///             eprintln!("no silence before {timestamp}: {reason:?}");
///         }
///         MediaEvent::SinkError { sink_name, error } => {
///             eprintln!("sink '{sink_name}' error: {error}");
///         }
///         other => eprintln!("{other:?}"),
///     }
/// }
/// # handle_event(MediaEvent::CacheFull { entries: 1024 });
/// ```
#[derive(Debug, Clone)]
pub enum MediaEvent {
    /// A gap was detected but not filled with silence.
    SilenceNotInserted {
        /// Timestamp of the frame that follows the gap.
        timestamp: i64,
        /// Why the gap was left as is.
        reason: SilenceSkipReason,
    },

    /// Silence was emitted to cover a gap.
    SilenceInserted {
        /// Number of silent samples emitted.
        samples: usize,
        /// Timestamp the silent frame was stamped with.
        timestamp: i64,
    },

    /// A read on a wrapped stream failed. The error is re-raised to the
    /// consumer on its next read.
    ReadFailed {
        /// Which component observed the failure.
        stream: String,
        /// The error message.
        error: String,
    },

    /// A frame cache or hand-off queue is full and is holding back the
    /// producer or dropping frames.
    CacheFull {
        /// Number of frames currently held.
        entries: usize,
    },

    /// A transform re-negotiated its input format mid-stream.
    FormatRenegotiated {
        /// Name of the transform.
        codec: String,
        /// The new input format.
        current: String,
    },

    /// A sink encountered an error during write.
    SinkError {
        /// Name of the sink that errored.
        sink_name: String,
        /// Description of the error.
        error: String,
    },

    /// A transcoding processor changed state.
    ProcessorStateChanged {
        /// Name of the new state.
        state: String,
    },
}

/// Callback type for receiving runtime events.
pub type EventCallback = Arc<dyn Fn(MediaEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use stream_media::{event_callback, MediaEvent};
///
/// let callback = event_callback(|event| {
///     println!("Got event: {:?}", event);
/// });
/// callback(MediaEvent::CacheFull { entries: 3 });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(MediaEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

pub(crate) fn emit(callback: Option<&EventCallback>, event: MediaEvent) {
    if let Some(cb) = callback {
        cb(event);
    }
}
