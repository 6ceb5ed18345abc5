//! Error types for stream-media.
//!
//! Errors are split into two categories:
//! - **Fatal errors** ([`MediaError`]): returned from connect/start/read and
//!   from pipeline construction
//! - **Recoverable events**: runtime issues (stale data, refused silence,
//!   sink hiccups) surfaced via [`EventCallback`](crate::EventCallback)

use std::time::Duration;

/// Errors raised by streams, data sources, transforms and pipelines.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    /// An I/O failure reported by an underlying stream.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A read on a wrapped stream failed; the failure is re-raised on the
    /// consumer's next read.
    #[error("read failed: {source}")]
    ReadFailed {
        /// The error reported by the wrapped stream.
        #[source]
        source: Box<MediaError>,
    },

    /// A component could not acquire what it needs to operate.
    #[error("resource unavailable: {name} - {reason}")]
    ResourceUnavailable {
        /// Name of the component.
        name: String,
        /// Why it is unavailable.
        reason: String,
    },

    /// A processing pipeline did not reach the requested state in time.
    #[error("processor did not reach state {state} within {waited:?}")]
    StateTimeout {
        /// The state that was awaited.
        state: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// An operation that needs a connected source was called on a
    /// disconnected one.
    #[error("data source is not connected")]
    NotConnected,

    /// No transform or negotiation path exists for the given format.
    #[error("unsupported format: {format}")]
    UnsupportedFormat {
        /// The format that was rejected.
        format: String,
    },

    /// The stream has ended.
    #[error("end of stream")]
    EndOfStream,

    /// An error from an audio backend (CPAL).
    #[error("audio backend error: {0}")]
    Backend(String),

    /// No source was configured before starting a pipeline.
    #[error("no source configured - set a pull, push or data source")]
    NoSourceConfigured,

    /// No sinks were configured before starting a pipeline.
    #[error("no sinks configured - add at least one sink")]
    NoSinksConfigured,

    /// A sink failed during initialization.
    #[error("sink '{sink_name}' failed to start: {reason}")]
    SinkStartFailed {
        /// Name of the sink that failed.
        sink_name: String,
        /// Why the sink failed to start.
        reason: String,
    },
}

impl MediaError {
    /// Wraps an error reported by an upstream stream.
    pub fn read_failed(source: MediaError) -> Self {
        Self::ReadFailed {
            source: Box::new(source),
        }
    }

    /// Creates a [`MediaError::ResourceUnavailable`].
    pub fn unavailable(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResourceUnavailable {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a [`MediaError::UnsupportedFormat`] from anything displayable.
    pub fn unsupported_format(format: impl std::fmt::Display) -> Self {
        Self::UnsupportedFormat {
            format: format.to_string(),
        }
    }
}

/// Errors that can occur within a [`Sink`](crate::Sink) implementation.
///
/// Sink errors are recoverable - the router will emit a
/// [`MediaEvent::SinkError`](crate::MediaEvent::SinkError) and may retry.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// A write operation failed.
    #[error("write failed: {reason}")]
    WriteFailed {
        /// Description of what went wrong.
        reason: String,
    },

    /// The sink's channel or connection was closed.
    #[error("sink closed")]
    Closed,

    /// The sink is temporarily unable to accept data.
    #[error("sink busy, retry later")]
    Busy,
}

impl SinkError {
    /// Creates a new write failure error.
    pub fn write_failed(reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            reason: reason.into(),
        }
    }

    /// Returns `true` if the router should retry the write.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy | Self::WriteFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_failed_keeps_source() {
        let inner = MediaError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "socket closed",
        ));
        let err = MediaError::read_failed(inner);
        let msg = err.to_string();
        assert!(msg.contains("read failed"));
        assert!(msg.contains("socket closed"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_state_timeout_display() {
        let err = MediaError::StateTimeout {
            state: "Configured".to_string(),
            waited: Duration::from_millis(250),
        };
        let msg = err.to_string();
        assert!(msg.contains("Configured"));
        assert!(msg.contains("250ms"));
    }

    #[test]
    fn test_unsupported_format_helper() {
        let err = MediaError::unsupported_format("opus/48000");
        assert!(matches!(
            err,
            MediaError::UnsupportedFormat { ref format } if format == "opus/48000"
        ));
    }

    #[test]
    fn test_sink_error_retryable() {
        assert!(SinkError::Busy.is_retryable());
        assert!(SinkError::write_failed("disk full").is_retryable());
        assert!(!SinkError::Closed.is_retryable());
    }
}
