//! Audio format descriptor.

use std::fmt;
use std::time::Duration;

use super::{base_matches, encoding, field_matches, DataType, Endian};

/// Describes sampled audio.
///
/// `None` in any field means "not specified".
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFormat {
    /// Encoding name, see [`encoding`](super::encoding).
    pub encoding: String,
    /// Payload element type.
    pub data_type: Option<DataType>,
    /// Samples per second, per channel.
    pub sample_rate: Option<f64>,
    /// Bits per sample.
    pub sample_size_in_bits: Option<u32>,
    /// Number of interleaved channels.
    pub channels: Option<u16>,
    /// Byte order of multi-byte samples.
    pub endian: Option<Endian>,
    /// Whether samples are signed.
    pub signed: Option<bool>,
    /// Bits per codec frame, for frame-based encodings.
    pub frame_size_in_bits: Option<u32>,
    /// Codec frames per second, for frame-based encodings.
    pub frame_rate: Option<f64>,
}

impl AudioFormat {
    /// Creates a format with only the encoding set.
    pub fn new(encoding: impl Into<String>) -> Self {
        Self {
            encoding: encoding.into(),
            data_type: None,
            sample_rate: None,
            sample_size_in_bits: None,
            channels: None,
            endian: None,
            signed: None,
            frame_size_in_bits: None,
            frame_rate: None,
        }
    }

    /// Creates a signed little-endian PCM format carried in byte payloads.
    #[must_use]
    pub fn linear(sample_rate: f64, sample_size_in_bits: u32, channels: u16) -> Self {
        Self::new(encoding::LINEAR)
            .with_data_type(DataType::Bytes)
            .with_sample_rate(sample_rate)
            .with_sample_size(sample_size_in_bits)
            .with_channels(channels)
            .with_endian(Endian::Little)
            .with_signed(true)
    }

    /// Sets the payload element type.
    #[must_use]
    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    /// Sets the sample rate in Hz.
    #[must_use]
    pub fn with_sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = Some(rate);
        self
    }

    /// Sets the sample size in bits.
    #[must_use]
    pub fn with_sample_size(mut self, bits: u32) -> Self {
        self.sample_size_in_bits = Some(bits);
        self
    }

    /// Sets the channel count.
    #[must_use]
    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = Some(channels);
        self
    }

    /// Sets the byte order.
    #[must_use]
    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = Some(endian);
        self
    }

    /// Sets signedness.
    #[must_use]
    pub fn with_signed(mut self, signed: bool) -> Self {
        self.signed = Some(signed);
        self
    }

    /// Sets codec frame size and rate for frame-based encodings.
    #[must_use]
    pub fn with_frames(mut self, frame_size_in_bits: u32, frame_rate: f64) -> Self {
        self.frame_size_in_bits = Some(frame_size_in_bits);
        self.frame_rate = Some(frame_rate);
        self
    }

    /// Returns `true` if every field specified on both sides agrees.
    #[must_use]
    pub fn matches(&self, other: &AudioFormat) -> bool {
        base_matches(
            &self.encoding,
            self.data_type,
            &other.encoding,
            other.data_type,
        ) && field_matches(self.sample_rate, other.sample_rate)
            && field_matches(self.sample_size_in_bits, other.sample_size_in_bits)
            && field_matches(self.channels, other.channels)
            && field_matches(self.endian, other.endian)
            && field_matches(self.signed, other.signed)
            && field_matches(self.frame_size_in_bits, other.frame_size_in_bits)
            && field_matches(self.frame_rate, other.frame_rate)
    }

    /// Fills every unset field of `self` from `other`.
    pub(crate) fn intersect(&self, other: &AudioFormat) -> AudioFormat {
        AudioFormat {
            encoding: if self.encoding.is_empty() {
                other.encoding.clone()
            } else {
                self.encoding.clone()
            },
            data_type: self.data_type.or(other.data_type),
            sample_rate: self.sample_rate.or(other.sample_rate),
            sample_size_in_bits: self.sample_size_in_bits.or(other.sample_size_in_bits),
            channels: self.channels.or(other.channels),
            endian: self.endian.or(other.endian),
            signed: self.signed.or(other.signed),
            frame_size_in_bits: self.frame_size_in_bits.or(other.frame_size_in_bits),
            frame_rate: self.frame_rate.or(other.frame_rate),
        }
    }

    pub(crate) fn relax(&self) -> AudioFormat {
        AudioFormat {
            frame_size_in_bits: None,
            frame_rate: None,
            ..self.clone()
        }
    }

    /// Duration of `bytes` bytes of payload, if the format says enough to
    /// compute it.
    #[must_use]
    pub fn duration_of(&self, bytes: usize) -> Option<Duration> {
        let bits = bytes as f64 * 8.0;
        if let (Some(size), Some(channels), Some(rate)) =
            (self.sample_size_in_bits, self.channels, self.sample_rate)
        {
            let bits_per_second = f64::from(size) * f64::from(channels) * rate;
            if bits_per_second > 0.0 {
                return Some(nanos(bits * 1e9 / bits_per_second));
            }
        }
        if let (Some(frame_size), Some(frame_rate)) = (self.frame_size_in_bits, self.frame_rate) {
            if frame_size > 0 && frame_rate > 0.0 {
                let frames = bits / f64::from(frame_size);
                return Some(nanos(frames * 1e9 / frame_rate));
            }
        }
        None
    }

    /// Bytes per interleaved sample frame, if known.
    #[must_use]
    pub fn frame_bytes(&self) -> Option<usize> {
        let bits = self.sample_size_in_bits?;
        let channels = self.channels?;
        Some((bits as usize / 8) * channels as usize)
    }
}

fn nanos(value: f64) -> Duration {
    Duration::from_nanos(value.round() as u64)
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encoding)?;
        if let Some(rate) = self.sample_rate {
            write!(f, ", {rate} Hz")?;
        }
        if let Some(bits) = self.sample_size_in_bits {
            write!(f, ", {bits}-bit")?;
        }
        match self.channels {
            Some(1) => write!(f, ", mono")?,
            Some(2) => write!(f, ", stereo")?,
            Some(n) => write!(f, ", {n}-channel")?,
            None => {}
        }
        if let Some(endian) = self.endian {
            write!(f, ", {endian:?}Endian")?;
        }
        if let Some(signed) = self.signed {
            write!(f, ", {}", if signed { "signed" } else { "unsigned" })?;
        }
        Ok(())
    }
}
