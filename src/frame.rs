//! The unit of media data passed between pipeline stages.

use std::ops::{BitOr, BitOrAssign};

use crate::format::{DataType, MediaFormat};

/// Timestamp or duration value meaning "unknown".
pub const TIME_UNKNOWN: i64 = -1;

/// Sequence number value meaning "unknown".
pub const SEQUENCE_UNKNOWN: i64 = i64::MAX - 1;

/// Largest RTP sequence number before wraparound.
pub const SEQUENCE_MAX: i64 = 65535;

/// Per-frame condition flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameFlags(u32);

impl FrameFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// The payload is to be ignored.
    pub const DISCARD: Self = Self(1);
    /// End of media.
    pub const EOM: Self = Self(1 << 1);
    /// The payload was intentionally dropped upstream (e.g. DTX).
    pub const SILENCE: Self = Self(1 << 2);
    /// Forward error correction data is present.
    pub const FEC: Self = Self(1 << 3);
    /// Packet loss concealment is requested for this frame.
    pub const PLC: Self = Self(1 << 4);
    /// RTP marker bit.
    pub const RTP_MARKER: Self = Self(1 << 5);

    /// Returns `true` if every flag in `other` is set.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if any flag in `other` is set.
    #[must_use]
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Sets or clears the flags in `other`.
    pub fn set(&mut self, other: Self, on: bool) {
        if on {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }

    /// Returns the raw bits.
    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for FrameFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for FrameFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Frame payload storage.
///
/// The capacity of a frame is the length of the underlying vector; the active
/// region is described by [`Frame::offset`] and [`Frame::length`] in elements.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Payload {
    /// No storage attached.
    #[default]
    Empty,
    /// Byte elements.
    Bytes(Vec<u8>),
    /// 16-bit elements.
    Shorts(Vec<i16>),
    /// 32-bit elements.
    Ints(Vec<i32>),
}

impl Payload {
    /// Number of elements of storage.
    #[must_use]
    pub fn capacity(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Bytes(v) => v.len(),
            Self::Shorts(v) => v.len(),
            Self::Ints(v) => v.len(),
        }
    }

    /// Element type, or `None` for [`Payload::Empty`].
    #[must_use]
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Self::Empty => None,
            Self::Bytes(_) => Some(DataType::Bytes),
            Self::Shorts(_) => Some(DataType::Shorts),
            Self::Ints(_) => Some(DataType::Ints),
        }
    }

    /// Returns `true` if no storage is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// A unit of media data plus its metadata.
///
/// Frames are owned by whichever stage currently holds them; stages hand them
/// on by move or copy their contents with [`Frame::copy_from`].
///
/// # Example
///
/// ```
/// use stream_media::{AudioFormat, Frame};
///
/// let frame = Frame::from_bytes(vec![0u8; 320], AudioFormat::linear(16000.0, 16, 1));
/// assert_eq!(frame.length, 320);
/// assert_eq!(frame.byte_len(), 320);
/// assert!(!frame.is_discard());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Payload storage.
    pub payload: Payload,
    /// Start of the active region, in elements.
    pub offset: usize,
    /// Length of the active region, in elements.
    pub length: usize,
    /// Format of the payload, if known.
    pub format: Option<MediaFormat>,
    /// Presentation timestamp in nanoseconds, or [`TIME_UNKNOWN`].
    pub timestamp: i64,
    /// RTP timestamp, or [`TIME_UNKNOWN`].
    pub rtp_timestamp: i64,
    /// Sequence number, or [`SEQUENCE_UNKNOWN`].
    pub sequence_number: i64,
    /// Duration in nanoseconds, or [`TIME_UNKNOWN`].
    pub duration: i64,
    /// Condition flags.
    pub flags: FrameFlags,
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl Frame {
    /// Creates an empty frame with unknown timing.
    #[must_use]
    pub fn new() -> Self {
        Self {
            payload: Payload::Empty,
            offset: 0,
            length: 0,
            format: None,
            timestamp: TIME_UNKNOWN,
            rtp_timestamp: TIME_UNKNOWN,
            sequence_number: SEQUENCE_UNKNOWN,
            duration: TIME_UNKNOWN,
            flags: FrameFlags::NONE,
        }
    }

    /// Creates a frame whose active region spans all of `data`.
    pub fn from_bytes(data: Vec<u8>, format: impl Into<MediaFormat>) -> Self {
        let length = data.len();
        Self {
            payload: Payload::Bytes(data),
            length,
            format: Some(format.into()),
            ..Self::new()
        }
    }

    /// Creates a frame with a zeroed byte payload of `capacity` bytes and an
    /// empty active region, ready for a stream to read into.
    #[must_use]
    pub fn with_byte_capacity(capacity: usize) -> Self {
        Self {
            payload: Payload::Bytes(vec![0; capacity]),
            ..Self::new()
        }
    }

    /// Creates a frame flagged [`FrameFlags::DISCARD`].
    #[must_use]
    pub fn discard() -> Self {
        let mut frame = Self::new();
        frame.set_discard(true);
        frame
    }

    /// Creates an end-of-media frame.
    #[must_use]
    pub fn eom() -> Self {
        let mut frame = Self::new();
        frame.set_eom(true);
        frame
    }

    /// Returns `true` if the frame is to be ignored.
    #[must_use]
    pub fn is_discard(&self) -> bool {
        self.flags.contains(FrameFlags::DISCARD)
    }

    /// Sets or clears the discard flag.
    pub fn set_discard(&mut self, discard: bool) {
        self.flags.set(FrameFlags::DISCARD, discard);
    }

    /// Returns `true` if the frame marks end of media.
    #[must_use]
    pub fn is_eom(&self) -> bool {
        self.flags.contains(FrameFlags::EOM)
    }

    /// Sets or clears the end-of-media flag.
    pub fn set_eom(&mut self, eom: bool) {
        self.flags.set(FrameFlags::EOM, eom);
    }

    /// Returns `true` if the active region fits inside the payload.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.offset + self.length <= self.payload.capacity()
    }

    /// Active region as bytes, if the payload holds bytes.
    #[must_use]
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Bytes(v) => v.get(self.offset..self.offset + self.length),
            _ => None,
        }
    }

    /// Active region as 16-bit elements, if the payload holds shorts.
    #[must_use]
    pub fn shorts(&self) -> Option<&[i16]> {
        match &self.payload {
            Payload::Shorts(v) => v.get(self.offset..self.offset + self.length),
            _ => None,
        }
    }

    /// Length of the active region in bytes.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.payload
            .data_type()
            .map_or(0, |t| self.length * t.element_size())
    }

    /// Copies the metadata of `other` (everything but payload and region).
    pub fn copy_metadata_from(&mut self, other: &Frame) {
        self.format.clone_from(&other.format);
        self.timestamp = other.timestamp;
        self.rtp_timestamp = other.rtp_timestamp;
        self.sequence_number = other.sequence_number;
        self.duration = other.duration;
        self.flags = other.flags;
    }

    /// Makes this frame an exact copy of `other`.
    pub fn copy_from(&mut self, other: &Frame) {
        self.clone_from(other);
    }

    /// Ensures a byte payload of at least `capacity` bytes is attached.
    ///
    /// Existing bytes are kept when `preserve` is set and the payload already
    /// held bytes; otherwise the new storage is zeroed.
    pub fn ensure_byte_capacity(&mut self, capacity: usize, preserve: bool) {
        let mut data = match std::mem::take(&mut self.payload) {
            Payload::Bytes(v) if preserve => v,
            _ => Vec::new(),
        };
        if data.len() < capacity {
            data.resize(capacity, 0);
        }
        self.payload = Payload::Bytes(data);
    }

    /// Ensures a 16-bit payload of at least `capacity` elements is attached.
    pub fn ensure_short_capacity(&mut self, capacity: usize, preserve: bool) {
        let mut data = match std::mem::take(&mut self.payload) {
            Payload::Shorts(v) if preserve => v,
            _ => Vec::new(),
        };
        if data.len() < capacity {
            data.resize(capacity, 0);
        }
        self.payload = Payload::Shorts(data);
    }

    /// Drops storage outside the active region so that `offset` becomes 0.
    pub fn compact(&mut self) {
        let (start, end) = (self.offset, self.offset + self.length);
        match &mut self.payload {
            Payload::Empty => {}
            Payload::Bytes(v) => compact_vec(v, start, end),
            Payload::Shorts(v) => compact_vec(v, start, end),
            Payload::Ints(v) => compact_vec(v, start, end),
        }
        self.offset = 0;
        self.length = self.payload.capacity();
    }
}

fn compact_vec<T>(v: &mut Vec<T>, start: usize, end: usize) {
    let end = end.min(v.len());
    v.truncate(end);
    v.drain(..start.min(end));
}

/// Number of sequence numbers lost between `last` and `current`, assuming
/// 16-bit wraparound.
#[must_use]
pub fn lost_sequence_count(last: i64, current: i64) -> i64 {
    if last == SEQUENCE_UNKNOWN {
        return 0;
    }
    let delta = current - last;
    match delta {
        0 => 0,
        d if d > 0 => d - 1,
        d => d + SEQUENCE_MAX,
    }
}

/// Next sequence number after `seq`, wrapping at [`SEQUENCE_MAX`].
#[must_use]
pub fn next_sequence(seq: i64) -> i64 {
    if seq >= SEQUENCE_MAX {
        0
    } else {
        seq + 1
    }
}
