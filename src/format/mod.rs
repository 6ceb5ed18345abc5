//! Media format descriptors and sample utilities.
//!
//! A format describes what a [`Frame`](crate::Frame) payload contains. Every
//! field is optional: an unset field is a wildcard that [`MediaFormat::matches`]
//! accepts against anything, and [`MediaFormat::intersects`] fills it in from
//! the other side. This is how a stage advertises "LINEAR, any rate" and a
//! negotiation settles on "LINEAR, 16 kHz, mono".
//!
//! The module also carries the PCM sample helpers the transforms use:
//! - Sample packing (bytes ↔ i16, either endianness)
//! - Channel conversion (stereo ↔ mono)
//! - Sample rate conversion (resampling)

mod audio;
mod convert;
mod resample;
mod video;

use std::fmt;
use std::time::Duration;

pub use audio::AudioFormat;
pub use convert::{
    channels_to_mono, decode_s16, encode_s16, f32_to_i16, mono_to_channels, stereo_to_mono,
};
pub use resample::{resample, resample_interleaved};
pub use video::VideoFormat;

/// Well-known encoding names.
///
/// Encodings compare case-insensitively, so `"linear"` matches [`LINEAR`].
pub mod encoding {
    /// Uncompressed PCM.
    pub const LINEAR: &str = "LINEAR";
    /// G.711 mu-law.
    pub const ULAW: &str = "ULAW";
    /// G.711 A-law.
    pub const ALAW: &str = "ALAW";
    /// Opus.
    pub const OPUS: &str = "opus";
    /// G.722 wideband.
    pub const G722: &str = "G722";
    /// VP8 video.
    pub const VP8: &str = "VP8";
    /// H.264 video.
    pub const H264: &str = "h264";
    /// Uncompressed RGB video.
    pub const RGB: &str = "RGB";
    /// Planar YUV video.
    pub const YUV: &str = "YUV";
}

/// Element type of a frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// `u8` elements.
    Bytes,
    /// `i16` elements.
    Shorts,
    /// `i32` elements.
    Ints,
}

impl DataType {
    /// Size of one element in bytes.
    #[must_use]
    pub fn element_size(self) -> usize {
        match self {
            Self::Bytes => 1,
            Self::Shorts => 2,
            Self::Ints => 4,
        }
    }
}

/// Byte order of multi-byte samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Endian {
    /// Most significant byte first.
    Big,
    /// Least significant byte first.
    #[default]
    Little,
}

/// The broad kind of media a format or a stage deals in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatFamily {
    /// Sampled audio.
    Audio,
    /// Video frames.
    Video,
}

/// A media format descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaFormat {
    /// An audio format.
    Audio(AudioFormat),
    /// A video format.
    Video(VideoFormat),
}

impl MediaFormat {
    /// Returns the encoding name.
    #[must_use]
    pub fn encoding(&self) -> &str {
        match self {
            Self::Audio(f) => &f.encoding,
            Self::Video(f) => &f.encoding,
        }
    }

    /// Returns the payload element type, if specified.
    #[must_use]
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Self::Audio(f) => f.data_type,
            Self::Video(f) => f.data_type,
        }
    }

    /// Returns which family this format belongs to.
    #[must_use]
    pub fn family(&self) -> FormatFamily {
        match self {
            Self::Audio(_) => FormatFamily::Audio,
            Self::Video(_) => FormatFamily::Video,
        }
    }

    /// Returns the audio descriptor, if this is an audio format.
    #[must_use]
    pub fn as_audio(&self) -> Option<&AudioFormat> {
        match self {
            Self::Audio(f) => Some(f),
            Self::Video(_) => None,
        }
    }

    /// Returns the video descriptor, if this is a video format.
    #[must_use]
    pub fn as_video(&self) -> Option<&VideoFormat> {
        match self {
            Self::Video(f) => Some(f),
            Self::Audio(_) => None,
        }
    }

    /// Returns `true` if every field specified on both sides agrees.
    ///
    /// Formats of different families only compare their encoding and data
    /// type.
    #[must_use]
    pub fn matches(&self, other: &MediaFormat) -> bool {
        match (self, other) {
            (Self::Audio(a), Self::Audio(b)) => a.matches(b),
            (Self::Video(a), Self::Video(b)) => a.matches(b),
            _ => base_matches(
                self.encoding(),
                self.data_type(),
                other.encoding(),
                other.data_type(),
            ),
        }
    }

    /// Returns a format carrying every field of `self`, with unset fields
    /// taken from `other`, or `None` when the two do not match.
    #[must_use]
    pub fn intersects(&self, other: &MediaFormat) -> Option<MediaFormat> {
        if !self.matches(other) {
            return None;
        }
        Some(self.fill_from(other))
    }

    /// Returns a copy with unset fields taken from `other`, without checking
    /// that the two match. Formats of different families are returned as is.
    #[must_use]
    pub fn fill_from(&self, other: &MediaFormat) -> MediaFormat {
        match (self, other) {
            (Self::Audio(a), Self::Audio(b)) => Self::Audio(a.intersect(b)),
            (Self::Video(a), Self::Video(b)) => Self::Video(a.intersect(b)),
            _ => self.clone(),
        }
    }

    /// Returns a copy with size-, rate- and length-related fields cleared.
    #[must_use]
    pub fn relax(&self) -> MediaFormat {
        match self {
            Self::Audio(f) => Self::Audio(f.relax()),
            Self::Video(f) => Self::Video(f.relax()),
        }
    }

    /// Duration of `bytes` bytes of payload in this format, if computable.
    ///
    /// Only audio formats with enough fields set yield a duration.
    #[must_use]
    pub fn duration_of(&self, bytes: usize) -> Option<Duration> {
        self.as_audio().and_then(|f| f.duration_of(bytes))
    }
}

impl From<AudioFormat> for MediaFormat {
    fn from(f: AudioFormat) -> Self {
        Self::Audio(f)
    }
}

impl From<VideoFormat> for MediaFormat {
    fn from(f: VideoFormat) -> Self {
        Self::Video(f)
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio(a) => a.fmt(f),
            Self::Video(v) => v.fmt(f),
        }
    }
}

/// Encoding and data type comparison shared by every family.
pub(crate) fn base_matches(
    encoding: &str,
    data_type: Option<DataType>,
    other_encoding: &str,
    other_data_type: Option<DataType>,
) -> bool {
    let encoding_ok = encoding.is_empty()
        || other_encoding.is_empty()
        || encoding.eq_ignore_ascii_case(other_encoding);
    encoding_ok && field_matches(data_type, other_data_type)
}

/// An unset field on either side is a wildcard.
pub(crate) fn field_matches<T: PartialEq>(a: Option<T>, b: Option<T>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

/// Returns the first entry of `candidates` that `format` matches.
pub fn find_matching<'a>(
    format: &MediaFormat,
    candidates: &'a [MediaFormat],
) -> Option<&'a MediaFormat> {
    candidates.iter().find(|c| format.matches(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcards_match() {
        let any_linear: MediaFormat = AudioFormat::new(encoding::LINEAR).into();
        let concrete: MediaFormat = AudioFormat::linear(16000.0, 16, 1).into();
        assert!(any_linear.matches(&concrete));
        assert!(concrete.matches(&any_linear));
    }

    #[test]
    fn test_encoding_is_case_insensitive() {
        let a: MediaFormat = AudioFormat::new("linear").into();
        let b: MediaFormat = AudioFormat::new("LINEAR").into();
        assert!(a.matches(&b));
    }

    #[test]
    fn test_conflicting_field_does_not_match() {
        let a: MediaFormat = AudioFormat::linear(16000.0, 16, 1).into();
        let b: MediaFormat = AudioFormat::linear(8000.0, 16, 1).into();
        assert!(!a.matches(&b));
        assert!(a.intersects(&b).is_none());
    }

    #[test]
    fn test_intersects_fills_unset_fields() {
        let supported: MediaFormat = AudioFormat::new(encoding::LINEAR)
            .with_sample_size(16)
            .with_signed(true)
            .into();
        let target: MediaFormat = AudioFormat::linear(8000.0, 16, 1).into();
        let chosen = supported.intersects(&target).unwrap();
        let audio = chosen.as_audio().unwrap();
        assert_eq!(audio.sample_rate, Some(8000.0));
        assert_eq!(audio.channels, Some(1));
        assert_eq!(audio.sample_size_in_bits, Some(16));
    }

    #[test]
    fn test_cross_family_compares_encoding_only() {
        let audio: MediaFormat = AudioFormat::new(encoding::LINEAR).into();
        let video: MediaFormat = VideoFormat::new(encoding::RGB).into();
        assert!(!audio.matches(&video));
        assert_ne!(audio.family(), video.family());
    }

    #[test]
    fn test_duration_only_for_audio() {
        let audio: MediaFormat = AudioFormat::linear(16000.0, 16, 1).into();
        assert_eq!(audio.duration_of(160), Some(Duration::from_millis(5)));
        let video: MediaFormat = VideoFormat::new(encoding::RGB).into();
        assert_eq!(video.duration_of(160), None);
    }

    #[test]
    fn test_find_matching_returns_first() {
        let list: Vec<MediaFormat> = vec![
            AudioFormat::new(encoding::ULAW).into(),
            AudioFormat::new(encoding::LINEAR).with_sample_rate(8000.0).into(),
            AudioFormat::new(encoding::LINEAR).into(),
        ];
        let wanted: MediaFormat = AudioFormat::linear(8000.0, 16, 1).into();
        assert_eq!(find_matching(&wanted, &list), Some(&list[1]));
    }
}
