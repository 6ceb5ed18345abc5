//! Format negotiation over whole data sources.
//!
//! A [`Processor`] inspects the tracks of an input source, lets the caller
//! pick an output format per track through [`TrackControl`]s, then builds a
//! transform chain for each one from a [`CodecRegistry`](crate::codec::CodecRegistry).
//! [`TranscodingSource`] packages that sequence behind the
//! [`DataSource`](crate::source::DataSource) lifecycle for a single target
//! format.

mod processor;
mod source;

pub use processor::{Processor, ProcessorOutput, ProcessorState, TrackControl};
pub use source::{TranscodingSource, DEFAULT_STATE_WAIT};
