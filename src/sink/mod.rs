//! Destinations for frames leaving a pipeline.
//!
//! A [`Sink`] receives every frame the pipeline delivers. [`ChannelSink`]
//! forwards frames to a tokio mpsc channel; implement the trait for anything
//! else (network writers, recorders, analysers).

mod channel;

pub use channel::ChannelSink;

use crate::{Frame, SinkError};
use async_trait::async_trait;

/// A destination for frames.
///
/// # Implementation Notes
///
/// - Methods take `&self` - use interior mutability if needed
/// - All methods are async and run on the tokio runtime
/// - `on_start` is called before any frame flows; open resources here
/// - `on_stop` is called during graceful shutdown, after the last write
/// - A failed `write` may be retried with the same frame
///
/// # Example
///
/// ```
/// use stream_media::{Frame, Sink, SinkError};
/// use async_trait::async_trait;
///
/// struct PrintSink;
///
/// #[async_trait]
/// impl Sink for PrintSink {
///     fn name(&self) -> &str {
///         "print"
///     }
///
///     async fn write(&self, frame: &Frame) -> Result<(), SinkError> {
///         println!("{} bytes at {}", frame.byte_len(), frame.timestamp);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Sink: Send + Sync {
    /// Human-readable name for logging and error messages.
    fn name(&self) -> &str;

    /// Called once before streaming begins.
    ///
    /// Errors here are fatal and prevent the pipeline from starting.
    async fn on_start(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Writes one frame.
    ///
    /// Errors are recoverable - the router emits a
    /// [`MediaEvent::SinkError`](crate::MediaEvent::SinkError) and retries
    /// retryable errors per [`PipelineConfig`](crate::PipelineConfig).
    async fn write(&self, frame: &Frame) -> Result<(), SinkError>;

    /// Called during graceful shutdown, even if writes failed.
    async fn on_stop(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
