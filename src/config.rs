//! Configuration types for streams and pipelines.

use std::time::Duration;

use crate::format::{AudioFormat, MediaFormat};

/// Target amount of media a [`CachingPushStream`](crate::CachingPushStream)
/// should hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferLength {
    /// No preference expressed. The cache then buffers nothing beyond a
    /// single frame.
    #[default]
    Default,
    /// Buffer up to this many milliseconds. Must be positive.
    Millis(u64),
}

impl BufferLength {
    /// Default target used by pipelines that enable caching.
    pub const PIPELINE_DEFAULT: Self = Self::Millis(DEFAULT_BUFFER_LENGTH_MS);

    /// Returns the millisecond target, or `None` for [`BufferLength::Default`].
    #[must_use]
    pub fn millis(self) -> Option<u64> {
        match self {
            Self::Default => None,
            Self::Millis(ms) => Some(ms),
        }
    }
}

/// Default cache target in milliseconds.
pub const DEFAULT_BUFFER_LENGTH_MS: u64 = 20;

/// Hard cap on the number of frames a cache holds.
pub const MAX_CACHE_ENTRIES: usize = 1024;

/// Settings for [`CachingPushStream`](crate::CachingPushStream).
///
/// # Example
///
/// ```
/// use stream_media::{BufferLength, CacheConfig};
///
/// let config = CacheConfig {
///     target_buffer_length: BufferLength::Millis(60),
///     ..Default::default()
/// };
/// assert_eq!(config.max_entries, 1024);
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Initial target length.
    ///
    /// Default: [`BufferLength::Default`] (buffer nothing)
    pub target_buffer_length: BufferLength,

    /// Maximum number of cached frames regardless of duration.
    ///
    /// Default: 1024
    pub max_entries: usize,

    /// How long a blocked producer sleeps before re-checking for room.
    ///
    /// Default: 10ms (half the default buffer length)
    pub wait_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            target_buffer_length: BufferLength::Default,
            max_entries: MAX_CACHE_ENTRIES,
            wait_interval: Duration::from_millis(DEFAULT_BUFFER_LENGTH_MS / 2),
        }
    }
}

/// How a silence-inserting transform interprets frame timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampMode {
    /// `Frame::timestamp` in nanoseconds.
    #[default]
    Generic,
    /// `Frame::rtp_timestamp` in ticks of a 32-bit RTP clock.
    Rtp {
        /// RTP clock rate in Hz.
        clock_rate: u32,
    },
}

impl TimestampMode {
    /// Ticks per second of the timestamp clock.
    #[must_use]
    pub fn clock_rate(self) -> f64 {
        match self {
            Self::Generic => 1e9,
            Self::Rtp { clock_rate } => f64::from(clock_rate),
        }
    }
}

/// Settings for [`SilenceEffect`](crate::codec::SilenceEffect).
#[derive(Debug, Clone)]
pub struct SilenceConfig {
    /// Sample rate of the audio, in Hz.
    ///
    /// Default: 48000
    pub sample_rate: u32,

    /// Which timestamp field to follow.
    ///
    /// Default: [`TimestampMode::Generic`]
    pub timestamp_mode: TimestampMode,

    /// Gaps longer than this are not filled.
    ///
    /// Default: 3 seconds
    pub max_silence: Duration,

    /// Largest amount of silence emitted by a single call.
    ///
    /// Default: 1 second
    pub max_per_packet: Duration,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            timestamp_mode: TimestampMode::Generic,
            max_silence: Duration::from_secs(3),
            max_per_packet: Duration::from_secs(1),
        }
    }
}

impl SilenceConfig {
    /// Configuration following RTP timestamps at `clock_rate`.
    #[must_use]
    pub fn rtp(clock_rate: u32) -> Self {
        Self {
            timestamp_mode: TimestampMode::Rtp { clock_rate },
            ..Self::default()
        }
    }

    /// Maximum samples emitted per call.
    #[must_use]
    pub fn max_samples_per_packet(&self) -> usize {
        (self.max_per_packet.as_secs_f64() * f64::from(self.sample_rate)).round() as usize
    }

    /// Maximum gap, in samples, that will be filled.
    #[must_use]
    pub fn max_silence_samples(&self) -> i64 {
        (self.max_silence.as_secs_f64() * f64::from(self.sample_rate)).round() as i64
    }
}

/// Preset target formats for transcoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatPreset {
    /// 8kHz mono, 16-bit - telephony.
    Narrowband,

    /// 16kHz mono, 16-bit - wideband speech, transcription services.
    #[default]
    Wideband,

    /// 48kHz mono, 16-bit - conferencing mixers.
    Fullband,

    /// Keep whatever the source delivers.
    Native,
}

impl FormatPreset {
    /// Returns the target sample rate, or `None` for native.
    #[must_use]
    pub fn sample_rate(&self) -> Option<u32> {
        match self {
            Self::Narrowband => Some(8000),
            Self::Wideband => Some(16000),
            Self::Fullband => Some(48000),
            Self::Native => None,
        }
    }

    /// Returns the target channel count, or `None` for native.
    #[must_use]
    pub fn channels(&self) -> Option<u16> {
        match self {
            Self::Native => None,
            _ => Some(1),
        }
    }

    /// Returns the target format, or `None` for native.
    #[must_use]
    pub fn format(&self) -> Option<MediaFormat> {
        let rate = self.sample_rate()?;
        let channels = self.channels()?;
        Some(AudioFormat::linear(f64::from(rate), 16, channels).into())
    }
}

/// Settings for a [`MediaPipeline`](crate::MediaPipeline).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Frame cache between the source and the rest of the pipeline, if any.
    ///
    /// Default: `None`
    pub cache: Option<CacheConfig>,

    /// Capacity of the channel between the producer thread and the router.
    ///
    /// Default: 64
    pub frame_channel_capacity: usize,

    /// Size in bytes of the buffer handed to each read. `None` lets the
    /// stream size the frame.
    ///
    /// Default: `None`
    pub read_size_bytes: Option<usize>,

    /// Number of retry attempts for failed sink writes.
    ///
    /// Default: 3
    pub sink_retry_attempts: u32,

    /// Delay between sink write retries, doubled each attempt.
    ///
    /// Default: 100ms
    pub sink_retry_delay: Duration,

    /// Whether stopping a pull adapter waits for its thread to exit.
    ///
    /// Default: false
    pub strict_stop: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache: None,
            frame_channel_capacity: 64,
            read_size_bytes: None,
            sink_retry_attempts: 3,
            sink_retry_delay: Duration::from_millis(100),
            strict_stop: false,
        }
    }
}
