//! Push and pull stream abstractions and the decorators built on them.
//!
//! A [`PushStream`] notifies a registered [`TransferHandler`] when it has data;
//! the handler then calls [`PushStream::read`]. A [`PullStream`] has no
//! notifications and its `read` blocks until data is available.
//!
//! Decorators substitute themselves in the notification path: they register
//! their own handler on the wrapped stream and forward to the downstream
//! handler with themselves as the stream argument, so a consumer always reads
//! from the outermost layer.

mod adapter;
mod cache;
mod rewritable;
mod transform;

use std::sync::Arc;

pub use adapter::{PullStreamAdapter, PushDataSourceAdapter, PushStreamAdapter};
pub use cache::{BufferControl, CachingPushStream};
pub use rewritable::{RewritableControl, RewritablePullStream, RewritablePushStream};
pub use transform::{TransformingPushStream, DEFAULT_PENDING_CAPACITY};

use crate::error::MediaError;
use crate::format::MediaFormat;
use crate::frame::Frame;

/// Callback invoked by a push stream when data is ready.
///
/// The argument is the stream to read from. It runs on the producer's thread.
pub type TransferHandler = Arc<dyn Fn(&dyn PushStream) + Send + Sync>;

/// Creates a [`TransferHandler`] from a closure.
pub fn transfer_handler<F>(f: F) -> TransferHandler
where
    F: Fn(&dyn PushStream) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A stream that announces data through a [`TransferHandler`].
pub trait PushStream: Send + Sync {
    /// Format of the frames this stream produces, if known.
    fn format(&self) -> Option<MediaFormat>;

    /// Reads the available data into `frame`.
    ///
    /// Never blocks for long. When nothing is available the frame comes back
    /// with zero length.
    fn read(&self, frame: &mut Frame) -> Result<(), MediaError>;

    /// Registers (or with `None`, clears) the handler notified on new data.
    fn set_transfer_handler(&self, handler: Option<TransferHandler>);

    /// Returns `true` once the stream has delivered its last frame.
    fn end_of_stream(&self) -> bool {
        false
    }

    /// Controls exposed by this stream and the streams it wraps.
    fn controls(&self) -> Vec<Control> {
        Vec::new()
    }
}

/// A stream read by blocking calls.
pub trait PullStream: Send + Sync {
    /// Format of the frames this stream produces, if known.
    fn format(&self) -> Option<MediaFormat>;

    /// Blocks until data, end of stream or an error is available.
    fn read(&self, frame: &mut Frame) -> Result<(), MediaError>;

    /// Returns `true` once the stream has delivered its last frame.
    fn end_of_stream(&self) -> bool {
        false
    }

    /// Returns `true` if a read is likely to block.
    fn will_read_block(&self) -> bool {
        true
    }

    /// Controls exposed by this stream and the streams it wraps.
    fn controls(&self) -> Vec<Control> {
        Vec::new()
    }
}

/// A stream of either kind.
#[derive(Clone)]
pub enum StreamEndpoint {
    /// A notification-driven stream.
    Push(Arc<dyn PushStream>),
    /// A blocking-read stream.
    Pull(Arc<dyn PullStream>),
}

impl StreamEndpoint {
    /// Format of the underlying stream.
    #[must_use]
    pub fn format(&self) -> Option<MediaFormat> {
        match self {
            Self::Push(s) => s.format(),
            Self::Pull(s) => s.format(),
        }
    }

    /// Controls of the underlying stream.
    #[must_use]
    pub fn controls(&self) -> Vec<Control> {
        match self {
            Self::Push(s) => s.controls(),
            Self::Pull(s) => s.controls(),
        }
    }

    /// Returns `true` if the underlying stream has ended.
    #[must_use]
    pub fn end_of_stream(&self) -> bool {
        match self {
            Self::Push(s) => s.end_of_stream(),
            Self::Pull(s) => s.end_of_stream(),
        }
    }

    /// Returns `true` if both endpoints refer to the same stream object.
    #[must_use]
    pub fn same_stream(&self, other: &StreamEndpoint) -> bool {
        match (self, other) {
            (Self::Push(a), Self::Push(b)) => Arc::ptr_eq(a, b),
            (Self::Pull(a), Self::Pull(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for StreamEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Push(_) => "Push",
            Self::Pull(_) => "Pull",
        };
        f.debug_struct("StreamEndpoint")
            .field("kind", &kind)
            .field("format", &self.format())
            .finish()
    }
}

/// A control handle exposed by a stream.
#[derive(Clone)]
pub enum Control {
    /// Buffering target of a frame cache.
    Buffer(Arc<BufferControl>),
    /// Mute/DTMF switches of a rewritable wrapper.
    Rewritable(Arc<RewritableControl>),
}

/// Returns the first buffer control in `controls`.
#[must_use]
pub fn find_buffer_control(controls: &[Control]) -> Option<Arc<BufferControl>> {
    controls.iter().find_map(|c| match c {
        Control::Buffer(b) => Some(b.clone()),
        Control::Rewritable(_) => None,
    })
}

/// Returns the first rewritable control in `controls`.
#[must_use]
pub fn find_rewritable_control(controls: &[Control]) -> Option<Arc<RewritableControl>> {
    controls.iter().find_map(|c| match c {
        Control::Rewritable(r) => Some(r.clone()),
        Control::Buffer(_) => None,
    })
}
