//! Fills timestamp gaps with silence.

use crate::config::{SilenceConfig, TimestampMode};
use crate::event::{emit, EventCallback, MediaEvent, SilenceSkipReason};
use crate::format::{encoding, AudioFormat, FormatFamily, MediaFormat};
use crate::frame::{Frame, FrameFlags, TIME_UNKNOWN};

use super::{Codec, CodecProcessor, NegotiatedFormats, ProcessStatus};

const SAMPLE_SIZE_IN_BITS: u32 = 16;
const RTP_WRAP: i64 = 1 << 32;

/// Inserts zero-valued audio wherever consecutive frames leave a gap in
/// their timestamps.
///
/// The effect tracks the timestamp the next frame should carry. When a frame
/// arrives later than that, silence covering the gap is emitted first and the
/// frame itself is reported not consumed, so the caller passes it again. A
/// single call emits at most [`SilenceConfig::max_per_packet`] of silence;
/// gaps longer than [`SilenceConfig::max_silence`] are not filled at all.
///
/// # Example
///
/// ```
/// use stream_media::codec::{SilenceEffect, Transform};
/// use stream_media::{AudioFormat, Frame, SilenceConfig};
///
/// let mut effect = SilenceEffect::codec(SilenceConfig::default());
/// let format = AudioFormat::linear(48000.0, 16, 1);
///
/// let mut first = Frame::from_bytes(vec![0; 1920], format.clone());
/// first.timestamp = 0;
/// effect.process(&mut first, &mut Frame::new());
///
/// // 20ms of audio later than expected
/// let mut late = Frame::from_bytes(vec![0; 1920], format);
/// late.timestamp = 40_000_000;
/// let mut silence = Frame::new();
/// effect.process(&mut late, &mut silence);
/// assert_eq!(silence.length, 1920);
/// assert_eq!(silence.timestamp, 20_000_000);
/// ```
pub struct SilenceEffect {
    config: SilenceConfig,
    last_output_timestamp: i64,
    total_samples_inserted: u64,
    listener: Option<EventCallback>,
}

impl SilenceEffect {
    /// Name the effect registers under.
    pub const NAME: &'static str = "Silence Effect";

    /// Creates the processor.
    #[must_use]
    pub fn new(config: SilenceConfig) -> Self {
        Self {
            config,
            last_output_timestamp: TIME_UNKNOWN,
            total_samples_inserted: 0,
            listener: None,
        }
    }

    /// Creates the effect, ready to be used as a [`Transform`](super::Transform).
    #[must_use]
    pub fn codec(config: SilenceConfig) -> Codec<Self> {
        let supported = vec![Self::supported_format(config.sample_rate)];
        Codec::effect(Self::NAME, FormatFamily::Audio, supported, Self::new(config))
    }

    /// 16-bit mono PCM at `sample_rate`, any byte order or signedness.
    #[must_use]
    pub fn supported_format(sample_rate: u32) -> MediaFormat {
        AudioFormat::new(encoding::LINEAR)
            .with_sample_rate(f64::from(sample_rate))
            .with_sample_size(SAMPLE_SIZE_IN_BITS)
            .with_channels(1)
            .into()
    }

    /// Forgets the expected timestamp, e.g. when the stream restarts.
    pub fn reset(&mut self) {
        self.last_output_timestamp = TIME_UNKNOWN;
    }

    /// Registers a callback for gaps that are left unfilled.
    pub fn set_listener(&mut self, listener: Option<EventCallback>) {
        self.listener = listener;
    }

    /// Total samples of silence emitted so far.
    pub fn total_samples_inserted(&self) -> u64 {
        self.total_samples_inserted
    }

    fn uses_rtp(&self) -> bool {
        matches!(self.config.timestamp_mode, TimestampMode::Rtp { .. })
    }

    fn clock_rate(&self) -> f64 {
        self.config.timestamp_mode.clock_rate()
    }

    fn sample_rate(&self) -> f64 {
        f64::from(self.config.sample_rate)
    }

    fn timestamp_of(&self, frame: &Frame) -> i64 {
        if self.uses_rtp() {
            frame.rtp_timestamp
        } else {
            frame.timestamp
        }
    }

    fn advance(&self, timestamp: i64, samples: usize) -> i64 {
        let ticks = (self.clock_rate() * samples as f64 / self.sample_rate()).round() as i64;
        let next = timestamp + ticks;
        if self.uses_rtp() && next >= RTP_WRAP {
            next - RTP_WRAP
        } else {
            next
        }
    }

    fn not_inserted(&self, timestamp: i64, reason: SilenceSkipReason) {
        emit(
            self.listener.as_ref(),
            MediaEvent::SilenceNotInserted { timestamp, reason },
        );
    }

    fn fill(&self, input: &Frame, output: &mut Frame, gap_samples: i64) -> usize {
        let samples = usize::try_from(gap_samples)
            .unwrap_or(usize::MAX)
            .min(self.config.max_samples_per_packet());
        let len = samples * SAMPLE_SIZE_IN_BITS as usize / 8;
        // fresh zeroed storage
        output.ensure_byte_capacity(len, false);
        output.offset = 0;
        output.length = len;
        output.format.clone_from(&input.format);
        output.flags = FrameFlags::NONE;
        output.duration = (samples as f64 * 1e9 / self.sample_rate()).round() as i64;
        if self.uses_rtp() {
            output.rtp_timestamp = self.last_output_timestamp;
        } else {
            output.timestamp = self.last_output_timestamp;
        }
        samples
    }
}

impl CodecProcessor for SilenceEffect {
    fn do_close(&mut self) {
        tracing::info!(
            samples = self.total_samples_inserted,
            "silence effect closed"
        );
    }

    fn do_process(
        &mut self,
        _formats: &NegotiatedFormats,
        input: &mut Frame,
        output: &mut Frame,
    ) -> ProcessStatus {
        let timestamp = self.timestamp_of(input);

        if timestamp == TIME_UNKNOWN {
            self.last_output_timestamp = TIME_UNKNOWN;
            self.not_inserted(timestamp, SilenceSkipReason::UnknownTimestamp);
        } else if self.last_output_timestamp == TIME_UNKNOWN {
            self.last_output_timestamp = timestamp;
            self.not_inserted(timestamp, SilenceSkipReason::FirstFrame);
        } else {
            let mut diff = timestamp - self.last_output_timestamp;
            if self.uses_rtp() && diff < -(1 << 31) {
                diff += RTP_WRAP;
            }
            if diff < 0 {
                tracing::trace!(
                    timestamp,
                    expected = self.last_output_timestamp,
                    "older frame dropped"
                );
                output.set_discard(true);
                return ProcessStatus::OK;
            }

            let mut gap_samples =
                (diff as f64 * self.sample_rate() / self.clock_rate()).round() as i64;
            if gap_samples > self.config.max_silence_samples() {
                tracing::warn!(
                    gap_samples,
                    max = self.config.max_silence_samples(),
                    "gap too large to fill with silence"
                );
                self.not_inserted(timestamp, SilenceSkipReason::GapTooLarge);
                self.last_output_timestamp = timestamp;
                gap_samples = 0;
            }

            if gap_samples > 0 {
                let stamped = self.last_output_timestamp;
                let inserted = self.fill(input, output, gap_samples);
                self.total_samples_inserted += inserted as u64;
                self.last_output_timestamp = self.advance(self.last_output_timestamp, inserted);
                emit(
                    self.listener.as_ref(),
                    MediaEvent::SilenceInserted {
                        samples: inserted,
                        timestamp: stamped,
                    },
                );
                return ProcessStatus::INPUT_NOT_CONSUMED;
            }
        }

        let in_len = input.byte_len();
        output.copy_from(input);
        output.compact();
        if timestamp != TIME_UNKNOWN {
            let samples = in_len * 8 / SAMPLE_SIZE_IN_BITS as usize;
            self.last_output_timestamp = self.advance(self.last_output_timestamp, samples);
        }
        ProcessStatus::OK
    }
}
