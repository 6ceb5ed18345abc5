//! Sample rate and channel conversion for 16-bit PCM.

use crate::format::{
    channels_to_mono, decode_s16, encode_s16, encoding, mono_to_channels, resample_interleaved,
    AudioFormat, Endian, FormatFamily, MediaFormat,
};
use crate::frame::{Frame, Payload, TIME_UNKNOWN};

use super::{Codec, CodecProcessor, NegotiatedFormats, ProcessStatus};

/// Converts 16-bit signed PCM between sample rates and channel counts.
///
/// Input may arrive as bytes (in the byte order of its format) or as 16-bit
/// elements. Output is always a byte payload in the byte order of the output
/// format. Fields the output format leaves unset are taken from the input,
/// so an output of "LINEAR, 16 kHz" keeps the input's channel count.
#[derive(Debug, Default)]
pub struct PcmConverter {
    frames: u64,
}

impl PcmConverter {
    /// Name the converter registers under.
    pub const NAME: &'static str = "PCM Converter";

    /// Creates the converter, ready to be used as a
    /// [`Transform`](super::Transform).
    #[must_use]
    pub fn codec() -> Codec<Self> {
        let pcm = Self::pcm_format();
        Codec::new(
            Self::NAME,
            FormatFamily::Audio,
            vec![pcm.clone()],
            vec![pcm],
            Self::default(),
        )
    }

    /// 16-bit signed PCM at any rate and channel count.
    #[must_use]
    pub fn pcm_format() -> MediaFormat {
        AudioFormat::new(encoding::LINEAR)
            .with_sample_size(16)
            .with_signed(true)
            .into()
    }

    /// Number of frames converted so far.
    pub fn frames_converted(&self) -> u64 {
        self.frames
    }
}

fn rate_of(format: &AudioFormat) -> Option<u32> {
    format.sample_rate.map(|r| r.round() as u32)
}

impl CodecProcessor for PcmConverter {
    fn do_process(
        &mut self,
        formats: &NegotiatedFormats,
        input: &mut Frame,
        output: &mut Frame,
    ) -> ProcessStatus {
        let Some(in_format) = input.format.as_ref().and_then(MediaFormat::as_audio) else {
            return ProcessStatus::FAILED;
        };
        let out_format = match formats.output.as_ref().and_then(MediaFormat::as_audio) {
            Some(wanted) => wanted.intersect(in_format),
            None => in_format.clone(),
        };

        let samples = match (&input.payload, input.bytes()) {
            (_, Some(bytes)) => decode_s16(bytes, in_format.endian.unwrap_or_default()),
            (Payload::Shorts(_), None) => input.shorts().unwrap_or_default().to_vec(),
            _ => return ProcessStatus::FAILED,
        };

        let in_channels = usize::from(in_format.channels.unwrap_or(1));
        let out_channels = usize::from(out_format.channels.unwrap_or(1));
        let mixed = match (in_channels, out_channels) {
            (a, b) if a == b => samples,
            (_, 1) => channels_to_mono(&samples, in_channels),
            (1, _) => mono_to_channels(&samples, out_channels),
            _ => mono_to_channels(&channels_to_mono(&samples, in_channels), out_channels),
        };

        let converted = match (rate_of(in_format), rate_of(&out_format)) {
            (Some(from), Some(to)) if from != to && from > 0 && to > 0 => {
                resample_interleaved(&mixed, out_channels, from, to)
            }
            _ => mixed,
        };

        let data = encode_s16(&converted, out_format.endian.unwrap_or(Endian::Little));
        output.copy_metadata_from(input);
        output.length = data.len();
        output.offset = 0;
        output.duration = out_format
            .duration_of(data.len())
            .and_then(|d| i64::try_from(d.as_nanos()).ok())
            .unwrap_or(TIME_UNKNOWN);
        output.payload = Payload::Bytes(data);
        output.format = Some(out_format.into());
        self.frames += 1;
        tracing::trace!(frames = self.frames, len = output.length, "pcm frame converted");
        ProcessStatus::OK
    }
}
