//! In-band DTMF tone generation.

use std::f64::consts::PI;
use std::time::Duration;

const KEY_TABLE: [[DtmfKey; 4]; 4] = [
    [DtmfKey::One, DtmfKey::Two, DtmfKey::Three, DtmfKey::A],
    [DtmfKey::Four, DtmfKey::Five, DtmfKey::Six, DtmfKey::B],
    [DtmfKey::Seven, DtmfKey::Eight, DtmfKey::Nine, DtmfKey::C],
    [DtmfKey::Asterisk, DtmfKey::Zero, DtmfKey::Pound, DtmfKey::D],
];

const LOW_FREQS: [f64; 4] = [697.0, 770.0, 852.0, 941.0];
const HIGH_FREQS: [f64; 4] = [1209.0, 1336.0, 1477.0, 1633.0];

/// Default length of the tone itself.
pub const DEFAULT_TONE_DURATION: Duration = Duration::from_millis(70);

/// Default silence before and after the tone.
pub const DEFAULT_INTER_DIGIT_INTERVAL: Duration = Duration::from_millis(45);

/// A key on the DTMF keypad.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DtmfKey {
    /// `0`
    Zero,
    /// `1`
    One,
    /// `2`
    Two,
    /// `3`
    Three,
    /// `4`
    Four,
    /// `5`
    Five,
    /// `6`
    Six,
    /// `7`
    Seven,
    /// `8`
    Eight,
    /// `9`
    Nine,
    /// `A`
    A,
    /// `B`
    B,
    /// `C`
    C,
    /// `D`
    D,
    /// `*`
    Asterisk,
    /// `#`
    Pound,
}

impl DtmfKey {
    /// Keypad character of this key.
    #[must_use]
    pub fn as_char(self) -> char {
        match self {
            Self::Zero => '0',
            Self::One => '1',
            Self::Two => '2',
            Self::Three => '3',
            Self::Four => '4',
            Self::Five => '5',
            Self::Six => '6',
            Self::Seven => '7',
            Self::Eight => '8',
            Self::Nine => '9',
            Self::A => 'A',
            Self::B => 'B',
            Self::C => 'C',
            Self::D => 'D',
            Self::Asterisk => '*',
            Self::Pound => '#',
        }
    }

    /// Parses a keypad character. Letters are case-insensitive.
    #[must_use]
    pub fn from_char(c: char) -> Option<Self> {
        let key = match c.to_ascii_uppercase() {
            '0' => Self::Zero,
            '1' => Self::One,
            '2' => Self::Two,
            '3' => Self::Three,
            '4' => Self::Four,
            '5' => Self::Five,
            '6' => Self::Six,
            '7' => Self::Seven,
            '8' => Self::Eight,
            '9' => Self::Nine,
            'A' => Self::A,
            'B' => Self::B,
            'C' => Self::C,
            'D' => Self::D,
            '*' => Self::Asterisk,
            '#' => Self::Pound,
            _ => return None,
        };
        Some(key)
    }

    /// `(low, high)` frequency pair in Hz.
    #[must_use]
    pub fn frequencies(self) -> (f64, f64) {
        for (row, keys) in KEY_TABLE.iter().enumerate() {
            if let Some(col) = keys.iter().position(|&k| k == self) {
                return (LOW_FREQS[row], HIGH_FREQS[col]);
            }
        }
        // every key is in the table
        (LOW_FREQS[3], HIGH_FREQS[1])
    }
}

/// A DTMF tone to be spliced into an audio stream.
#[derive(Debug, Clone, PartialEq)]
pub struct DtmfTone {
    /// The key this tone signals.
    pub key: DtmfKey,
    /// Length of the dual-frequency part.
    pub tone_duration: Duration,
    /// Silence before and after the tone.
    pub inter_digit_interval: Duration,
    /// Amplitude scale in `0.0..=1.0`.
    pub volume: f64,
}

impl DtmfTone {
    /// Creates a tone with the default timing at full volume.
    #[must_use]
    pub fn new(key: DtmfKey) -> Self {
        Self {
            key,
            tone_duration: DEFAULT_TONE_DURATION,
            inter_digit_interval: DEFAULT_INTER_DIGIT_INTERVAL,
            volume: 1.0,
        }
    }

    /// Creates a tone from a keypad character.
    #[must_use]
    pub fn from_char(c: char) -> Option<Self> {
        DtmfKey::from_char(c).map(Self::new)
    }

    /// Sets the amplitude scale, clamped to `0.0..=1.0`.
    #[must_use]
    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume.clamp(0.0, 1.0);
        self
    }

    /// Generates `gap + tone + gap` samples for the given rate and width.
    ///
    /// Values fit a signed `sample_size_in_bits` integer (8 or 16 bits).
    #[must_use]
    pub fn audio_samples(&self, sample_rate: f64, sample_size_in_bits: u32) -> Vec<i16> {
        let gap = (sample_rate * self.inter_digit_interval.as_secs_f64()).round() as usize;
        let tone = (sample_rate * self.tone_duration.as_secs_f64()).round() as usize;
        let bits = sample_size_in_bits.clamp(2, 16);
        let max = f64::from((1i32 << (bits - 1)) - 1) * self.volume;
        let (f1, f2) = self.key.frequencies();

        let mut samples = vec![0i16; gap * 2 + tone];
        for (n, sample) in samples[gap..gap + tone].iter_mut().enumerate() {
            let t = n as f64 / sample_rate;
            let value = 0.5 * (2.0 * PI * f1 * t).sin() + 0.5 * (2.0 * PI * f2 * t).sin();
            *sample = (value * max).round() as i16;
        }
        samples
    }
}
