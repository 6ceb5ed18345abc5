//! Format-negotiating transforms.
//!
//! A [`Codec`] owns the format bookkeeping shared by every transform: the
//! supported input and output sets, the negotiated pair, the open/closed
//! state, byte counters and the common [`process`](Transform::process)
//! pipeline. The actual per-frame work lives in a [`CodecProcessor`].
//!
//! `process` runs these steps in order:
//! 1. An input without a format (and not end of media) fails.
//! 2. End of media is propagated to the output.
//! 3. A discarded input discards the output.
//! 4. If the input's format no longer matches the negotiated one, the input
//!    format is renegotiated.
//! 5. A frame flagged silence is not processed unless the codec does FEC or
//!    PLC; the output is reported not filled.
//! 6. Otherwise the processor runs.

mod pcm;
mod registry;
mod silence;

use std::ops::{BitOr, BitOrAssign};

pub use pcm::PcmConverter;
pub use registry::{CodecFactory, CodecRegistry};
pub use silence::SilenceEffect;

use crate::error::MediaError;
use crate::event::{emit, EventCallback, MediaEvent};
use crate::format::{find_matching, FormatFamily, MediaFormat};
use crate::frame::{Frame, FrameFlags};

/// Outcome of one [`Transform::process`] call, as a set of flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ProcessStatus(u32);

impl ProcessStatus {
    /// The input was consumed and the output filled.
    pub const OK: Self = Self(0);
    /// Processing failed.
    pub const FAILED: Self = Self(1);
    /// The input must be passed again; it was not (fully) consumed.
    pub const INPUT_NOT_CONSUMED: Self = Self(1 << 1);
    /// The output holds nothing usable.
    pub const OUTPUT_NOT_FILLED: Self = Self(1 << 2);

    /// Returns `true` if every flag in `other` is set.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if the failure flag is set.
    #[must_use]
    pub fn is_failed(self) -> bool {
        self.contains(Self::FAILED)
    }
}

impl BitOr for ProcessStatus {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ProcessStatus {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Optional capabilities of a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CodecFeatures(u32);

impl CodecFeatures {
    /// No optional capabilities.
    pub const NONE: Self = Self(0);
    /// Forward error correction.
    pub const FEC: Self = Self(1);
    /// Packet loss concealment.
    pub const PLC: Self = Self(1 << 1);

    /// Returns `true` if any flag in `other` is set.
    #[must_use]
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for CodecFeatures {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Bytes processed by a codec, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecStats {
    /// Input bytes consumed.
    pub bytes_in: u64,
    /// Output bytes produced.
    pub bytes_out: u64,
}

/// The currently negotiated formats of a codec.
#[derive(Debug, Clone, Default)]
pub struct NegotiatedFormats {
    /// Input format, once set.
    pub input: Option<MediaFormat>,
    /// Output format, once set.
    pub output: Option<MediaFormat>,
}

/// The work a [`Codec`] delegates.
pub trait CodecProcessor: Send {
    /// Acquires resources. Called once by [`Transform::open`].
    fn do_open(&mut self, _formats: &NegotiatedFormats) -> Result<(), MediaError> {
        Ok(())
    }

    /// Releases resources. Called once by [`Transform::close`].
    fn do_close(&mut self) {}

    /// Processes one input frame into `output`.
    fn do_process(
        &mut self,
        formats: &NegotiatedFormats,
        input: &mut Frame,
        output: &mut Frame,
    ) -> ProcessStatus;

    /// Called after the input format was renegotiated mid-stream.
    fn on_input_format_changed(&mut self, _format: &MediaFormat) {}
}

/// A format-negotiating media transform.
pub trait Transform: Send {
    /// Human-readable name.
    fn name(&self) -> &str;

    /// Formats accepted on input.
    fn supported_input_formats(&self) -> &[MediaFormat];

    /// Formats producible from `input`, or all of them for `None`.
    ///
    /// Empty when `input` is of the wrong family or not accepted.
    fn supported_output_formats(&self, input: Option<&MediaFormat>) -> Vec<MediaFormat>;

    /// Negotiated input format.
    fn input_format(&self) -> Option<&MediaFormat>;

    /// Negotiated output format.
    fn output_format(&self) -> Option<&MediaFormat>;

    /// Sets the input format. Returns the format now in effect, or `None`
    /// (state unchanged) if it is not accepted.
    fn set_input_format(&mut self, format: &MediaFormat) -> Option<MediaFormat>;

    /// Sets the output format. Returns the format now in effect, or `None`
    /// (state unchanged) if it cannot be produced from the current input.
    fn set_output_format(&mut self, format: &MediaFormat) -> Option<MediaFormat>;

    /// Opens the transform. Opening an open transform is a no-op.
    fn open(&mut self) -> Result<(), MediaError>;

    /// Closes the transform. Closing a closed transform is a no-op.
    fn close(&mut self);

    /// Returns `true` between `open` and `close`.
    fn is_open(&self) -> bool;

    /// Processes `input` into `output`.
    fn process(&mut self, input: &mut Frame, output: &mut Frame) -> ProcessStatus;

    /// Bytes processed so far.
    fn stats(&self) -> CodecStats;

    /// Registers a callback for renegotiation events.
    fn set_event_callback(&mut self, _callback: Option<EventCallback>) {}
}

/// Format bookkeeping around a [`CodecProcessor`].
pub struct Codec<P> {
    name: String,
    family: FormatFamily,
    supported_input: Vec<MediaFormat>,
    supported_output: Vec<MediaFormat>,
    effect: bool,
    features: CodecFeatures,
    formats: NegotiatedFormats,
    opened: bool,
    stats: CodecStats,
    events: Option<EventCallback>,
    processor: P,
}

impl<P: CodecProcessor> Codec<P> {
    /// Creates a codec converting `supported_input` into `supported_output`.
    pub fn new(
        name: impl Into<String>,
        family: FormatFamily,
        supported_input: Vec<MediaFormat>,
        supported_output: Vec<MediaFormat>,
        processor: P,
    ) -> Self {
        Self {
            name: name.into(),
            family,
            supported_input,
            supported_output,
            effect: false,
            features: CodecFeatures::NONE,
            formats: NegotiatedFormats::default(),
            opened: false,
            stats: CodecStats::default(),
            events: None,
            processor,
        }
    }

    /// Creates an effect: output formats echo the input format.
    pub fn effect(
        name: impl Into<String>,
        family: FormatFamily,
        supported: Vec<MediaFormat>,
        processor: P,
    ) -> Self {
        let mut codec = Self::new(name, family, supported.clone(), supported, processor);
        codec.effect = true;
        codec
    }

    /// Declares optional capabilities.
    #[must_use]
    pub fn with_features(mut self, features: CodecFeatures) -> Self {
        self.features = features;
        self
    }

    /// Declared capabilities.
    pub fn features(&self) -> CodecFeatures {
        self.features
    }

    /// Returns `true` for effects.
    pub fn is_effect(&self) -> bool {
        self.effect
    }

    /// The processor doing the per-frame work.
    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// Mutable access to the processor.
    pub fn processor_mut(&mut self) -> &mut P {
        &mut self.processor
    }

    fn accepts(&self, format: &MediaFormat) -> bool {
        format.family() == self.family && find_matching(format, &self.supported_input).is_some()
    }

    fn renegotiate(&mut self, format: &MediaFormat) -> bool {
        if self.set_input_format(format).is_none() {
            tracing::warn!(codec = %self.name, format = %format, "input format not supported");
            return false;
        }
        tracing::debug!(codec = %self.name, format = %format, "input format renegotiated");
        self.processor.on_input_format_changed(format);
        emit(
            self.events.as_ref(),
            MediaEvent::FormatRenegotiated {
                codec: self.name.clone(),
                current: format.to_string(),
            },
        );
        true
    }
}

impl<P: CodecProcessor> Transform for Codec<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_input_formats(&self) -> &[MediaFormat] {
        &self.supported_input
    }

    fn supported_output_formats(&self, input: Option<&MediaFormat>) -> Vec<MediaFormat> {
        let Some(input) = input else {
            return self.supported_output.clone();
        };
        if !self.accepts(input) {
            return Vec::new();
        }
        if self.effect {
            vec![input.clone()]
        } else {
            self.supported_output.clone()
        }
    }

    fn input_format(&self) -> Option<&MediaFormat> {
        self.formats.input.as_ref()
    }

    fn output_format(&self) -> Option<&MediaFormat> {
        self.formats.output.as_ref()
    }

    fn set_input_format(&mut self, format: &MediaFormat) -> Option<MediaFormat> {
        if !self.accepts(format) {
            return None;
        }
        self.formats.input = Some(format.clone());
        if self.effect {
            self.formats.output = Some(format.clone());
        }
        Some(format.clone())
    }

    fn set_output_format(&mut self, format: &MediaFormat) -> Option<MediaFormat> {
        if format.family() != self.family {
            return None;
        }
        let candidates = self.supported_output_formats(self.formats.input.as_ref());
        find_matching(format, &candidates)?;
        self.formats.output = Some(format.clone());
        Some(format.clone())
    }

    fn open(&mut self) -> Result<(), MediaError> {
        if self.opened {
            return Ok(());
        }
        self.processor.do_open(&self.formats)?;
        self.opened = true;
        tracing::debug!(codec = %self.name, "codec opened");
        Ok(())
    }

    fn close(&mut self) {
        if !self.opened {
            return;
        }
        self.processor.do_close();
        self.opened = false;
        tracing::debug!(
            codec = %self.name,
            bytes_in = self.stats.bytes_in,
            bytes_out = self.stats.bytes_out,
            "codec closed"
        );
    }

    fn is_open(&self) -> bool {
        self.opened
    }

    fn process(&mut self, input: &mut Frame, output: &mut Frame) -> ProcessStatus {
        if !input.is_eom() && input.format.is_none() {
            return ProcessStatus::FAILED;
        }
        if input.is_eom() {
            output.set_eom(true);
            output.length = 0;
            output.format.clone_from(&self.formats.output);
            return ProcessStatus::OK;
        }
        if input.is_discard() {
            output.set_discard(true);
            return ProcessStatus::OK;
        }

        if let Some(format) = input.format.clone() {
            let current = self.formats.input.as_ref();
            let changed = current.map_or(true, |c| *c != format && !format.matches(c));
            if changed && !self.renegotiate(&format) {
                return ProcessStatus::FAILED;
            }
        }

        let in_len = input.byte_len();
        let status = if !self
            .features
            .intersects(CodecFeatures::FEC | CodecFeatures::PLC)
            && input.flags.contains(FrameFlags::SILENCE)
        {
            ProcessStatus::OUTPUT_NOT_FILLED
        } else {
            self.processor.do_process(&self.formats, input, output)
        };

        let mut consumed = in_len;
        if status.contains(ProcessStatus::INPUT_NOT_CONSUMED) {
            consumed = consumed.saturating_sub(input.byte_len());
        }
        self.stats.bytes_in += consumed as u64;
        if !status.is_failed() && !status.contains(ProcessStatus::OUTPUT_NOT_FILLED) {
            self.stats.bytes_out += output.byte_len() as u64;
        }
        status
    }

    fn stats(&self) -> CodecStats {
        self.stats
    }

    fn set_event_callback(&mut self, callback: Option<EventCallback>) {
        self.events = callback;
    }
}

/// Runs `input` through every transform of `chain` in order and returns the
/// resulting frames.
///
/// A transform reporting [`ProcessStatus::INPUT_NOT_CONSUMED`] is called
/// again with the same input, so one input can yield several outputs. Outputs
/// that are not filled or are discarded are dropped; end-of-media outputs
/// are kept. A transform that keeps the input without consuming any of it or
/// producing output is abandoned for that frame.
pub fn run_chain(chain: &mut [Box<dyn Transform>], input: Frame) -> Vec<Frame> {
    let mut frames = vec![input];
    for transform in chain.iter_mut() {
        let mut next = Vec::with_capacity(frames.len());
        for mut frame in frames {
            loop {
                let remaining = frame.byte_len();
                let mut out = Frame::new();
                let status = transform.process(&mut frame, &mut out);
                if status.is_failed() {
                    tracing::warn!(codec = %transform.name(), "frame processing failed");
                    break;
                }
                let filled = !status.contains(ProcessStatus::OUTPUT_NOT_FILLED);
                if filled && (out.is_eom() || !out.is_discard()) {
                    next.push(out);
                }
                if !status.contains(ProcessStatus::INPUT_NOT_CONSUMED) {
                    break;
                }
                if !filled && frame.byte_len() == remaining {
                    tracing::warn!(
                        codec = %transform.name(),
                        "transform made no progress, input dropped"
                    );
                    break;
                }
            }
        }
        frames = next;
    }
    frames
}
