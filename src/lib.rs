//! # stream-media
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Media stream plumbing for real-time audio and video pipelines.
//!
//! `stream-media` moves frames between producers and consumers that disagree
//! on who drives the flow, how much should be buffered, and which format the
//! data is in:
//!
//! - **Push and pull streams** with adapters in both directions
//! - **A bounded frame cache** that holds a target duration of media
//! - **Mute and in-band DTMF** rewriting of outgoing audio
//! - **Transforms** with format negotiation, including silence insertion
//!   across timestamp gaps
//! - **Transcoding sources** that negotiate a conversion chain per track
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stream_media::source::MockPullStream;
//! use stream_media::{AudioFormat, BufferLength, ChannelSink, Frame, MediaPipeline, SilenceConfig};
//! use tokio::sync::mpsc;
//!
//! # async fn run() -> Result<(), stream_media::MediaError> {
//! let format = AudioFormat::linear(16000.0, 16, 1);
//! let network = Arc::new(MockPullStream::new(format));
//! let (tx, mut rx) = mpsc::channel::<Frame>(32);
//!
//! let session = MediaPipeline::builder()
//!     .pull_source(network)
//!     .silence(SilenceConfig { sample_rate: 16000, ..SilenceConfig::default() })
//!     .cache(BufferLength::Millis(40))
//!     .rewritable()
//!     .add_sink(ChannelSink::new(tx))
//!     .on_event(|e| tracing::warn!(?e, "media event"))
//!     .start()
//!     .await?;
//!
//! if let Some(control) = session.rewritable_control() {
//!     control.set_mute(true);
//! }
//! while let Some(frame) = rx.recv().await {
//!     // hand the frame to a mixer, encoder, recognizer...
//! #   let _ = frame;
//! #   break;
//! }
//!
//! session.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Stream decorators never block the producer on the consumer:
//!
//! - **Producer thread**: a push stream's own thread, or a `pull-adapter`
//!   thread performing blocking reads, runs every transform and cache write
//! - **Transfer handlers**: each decorator substitutes itself in the
//!   notification path, so consumers always read from the outermost layer
//! - **Tokio Runtime**: the async router fans frames out to all sinks

#![warn(missing_docs)]
// Media code converts between sample formats and clock units on purpose
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod builder;
pub mod codec;
mod config;
pub mod dtmf;
mod error;
mod event;
pub mod format;
pub mod frame;
mod pipeline;
mod session;
mod sink;
pub mod source;
pub mod stream;
pub mod transcode;

pub use builder::{MediaPipeline, MediaPipelineBuilder};
pub use codec::{CodecRegistry, SilenceEffect};
pub use config::{
    BufferLength, CacheConfig, FormatPreset, PipelineConfig, SilenceConfig, TimestampMode,
};
pub use dtmf::{DtmfKey, DtmfTone};
pub use error::{MediaError, SinkError};
pub use event::{event_callback, EventCallback, MediaEvent, SilenceSkipReason};
pub use format::{AudioFormat, MediaFormat, VideoFormat};
pub use frame::{Frame, FrameFlags, Payload};
pub use session::{Session, SessionStats};
pub use sink::{ChannelSink, Sink};
pub use stream::{
    CachingPushStream, PullStream, PushStream, RewritableControl, StreamEndpoint,
};
pub use transcode::TranscodingSource;
