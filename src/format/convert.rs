//! Sample packing and channel conversion.

use super::Endian;

/// Converts an f32 sample in [-1.0, 1.0] to i16, clamping out-of-range input.
///
/// Scales by 32767 so that full scale is symmetric.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Unpacks 16-bit samples from bytes. A trailing odd byte is ignored.
pub fn decode_s16(bytes: &[u8], endian: Endian) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| {
            let pair = [pair[0], pair[1]];
            match endian {
                Endian::Little => i16::from_le_bytes(pair),
                Endian::Big => i16::from_be_bytes(pair),
            }
        })
        .collect()
}

/// Packs 16-bit samples into bytes.
pub fn encode_s16(samples: &[i16], endian: Endian) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        match endian {
            Endian::Little => out.extend_from_slice(&s.to_le_bytes()),
            Endian::Big => out.extend_from_slice(&s.to_be_bytes()),
        }
    }
    out
}

/// Averages interleaved stereo pairs into mono.
pub fn stereo_to_mono(stereo: &[i16]) -> Vec<i16> {
    channels_to_mono(stereo, 2)
}

/// Averages each interleaved frame of `channels` samples into one.
///
/// A trailing partial frame is dropped.
pub fn channels_to_mono(samples: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Repeats each mono sample across `channels` interleaved channels.
pub fn mono_to_channels(mono: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return mono.to_vec();
    }
    mono.iter()
        .flat_map(|&s| std::iter::repeat(s).take(channels))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_to_i16_clamps() {
        assert_eq!(f32_to_i16(1.0), 32767);
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(-2.0), -32768);
    }

    #[test]
    fn test_decode_endianness() {
        let bytes = [0x01, 0x02];
        assert_eq!(decode_s16(&bytes, Endian::Little), vec![0x0201]);
        assert_eq!(decode_s16(&bytes, Endian::Big), vec![0x0102]);
    }

    #[test]
    fn test_decode_ignores_odd_byte() {
        assert_eq!(decode_s16(&[0, 0, 7], Endian::Little).len(), 1);
    }

    #[test]
    fn test_encode_big_endian() {
        assert_eq!(encode_s16(&[0x0102, -1], Endian::Big), vec![1, 2, 0xff, 0xff]);
    }

    #[test]
    fn test_stereo_to_mono() {
        assert_eq!(stereo_to_mono(&[100, 200, 300, 400]), vec![150, 350]);
        assert_eq!(stereo_to_mono(&[1000, -1000]), vec![0]);
    }

    #[test]
    fn test_mono_to_channels() {
        assert_eq!(mono_to_channels(&[1, 2], 2), vec![1, 1, 2, 2]);
        assert_eq!(mono_to_channels(&[5], 3), vec![5, 5, 5]);
    }

    #[test]
    fn test_channels_to_mono_drops_partial_frame() {
        assert_eq!(channels_to_mono(&[3, 3, 3, 9], 3), vec![3]);
    }
}
