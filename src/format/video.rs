//! Video format descriptor.

use std::fmt;

use super::{base_matches, field_matches, DataType};

/// Describes video frames.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFormat {
    /// Encoding name.
    pub encoding: String,
    /// Payload element type.
    pub data_type: Option<DataType>,
    /// Frame dimensions as `(width, height)`.
    pub size: Option<(u32, u32)>,
    /// Upper bound on a frame's payload length.
    pub max_data_length: Option<usize>,
    /// Frames per second.
    pub frame_rate: Option<f64>,
}

impl VideoFormat {
    /// Creates a format with only the encoding set.
    pub fn new(encoding: impl Into<String>) -> Self {
        Self {
            encoding: encoding.into(),
            data_type: None,
            size: None,
            max_data_length: None,
            frame_rate: None,
        }
    }

    /// Sets the frame dimensions.
    #[must_use]
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.size = Some((width, height));
        self
    }

    /// Sets the frame rate.
    #[must_use]
    pub fn with_frame_rate(mut self, frame_rate: f64) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    /// Sets the maximum payload length.
    #[must_use]
    pub fn with_max_data_length(mut self, max: usize) -> Self {
        self.max_data_length = Some(max);
        self
    }

    /// Returns `true` if every field specified on both sides agrees.
    #[must_use]
    pub fn matches(&self, other: &VideoFormat) -> bool {
        base_matches(
            &self.encoding,
            self.data_type,
            &other.encoding,
            other.data_type,
        ) && field_matches(self.size, other.size)
            && field_matches(self.max_data_length, other.max_data_length)
            && field_matches(self.frame_rate, other.frame_rate)
    }

    pub(crate) fn intersect(&self, other: &VideoFormat) -> VideoFormat {
        VideoFormat {
            encoding: if self.encoding.is_empty() {
                other.encoding.clone()
            } else {
                self.encoding.clone()
            },
            data_type: self.data_type.or(other.data_type),
            size: self.size.or(other.size),
            max_data_length: self.max_data_length.or(other.max_data_length),
            frame_rate: self.frame_rate.or(other.frame_rate),
        }
    }

    pub(crate) fn relax(&self) -> VideoFormat {
        VideoFormat {
            size: None,
            max_data_length: None,
            frame_rate: None,
            ..self.clone()
        }
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encoding)?;
        if let Some((w, h)) = self.size {
            write!(f, ", {w}x{h}")?;
        }
        if let Some(rate) = self.frame_rate {
            write!(f, ", FrameRate={rate:.1}")?;
        }
        if let Some(max) = self.max_data_length {
            write!(f, ", Length={max}")?;
        }
        Ok(())
    }
}
