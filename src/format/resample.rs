//! Sample rate conversion by linear interpolation.
//!
//! Good enough for speech. Each call treats its input as an isolated block,
//! so frame boundaries are not phase-continuous.

/// Resamples a mono block from `from_rate` to `to_rate` Hz.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    if from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }

    let step = f64::from(from_rate) / f64::from(to_rate);
    let out_len = (samples.len() as f64 / step).ceil() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = (pos as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = pos - idx as f64;
            let a = f64::from(samples[idx]);
            let b = f64::from(samples[next]);
            (a + (b - a) * frac) as i16
        })
        .collect()
}

/// Resamples interleaved audio with `channels` channels.
///
/// Channels are resampled independently. A trailing partial frame is dropped.
pub fn resample_interleaved(
    samples: &[i16],
    channels: usize,
    from_rate: u32,
    to_rate: u32,
) -> Vec<i16> {
    if channels <= 1 {
        return resample(samples, from_rate, to_rate);
    }
    if from_rate == to_rate {
        return samples.to_vec();
    }

    let per_channel: Vec<Vec<i16>> = (0..channels)
        .map(|ch| {
            let plane: Vec<i16> = samples
                .chunks_exact(channels)
                .map(|frame| frame[ch])
                .collect();
            resample(&plane, from_rate, to_rate)
        })
        .collect();

    let frames = per_channel.first().map_or(0, Vec::len);
    let mut out = Vec::with_capacity(frames * channels);
    for i in 0..frames {
        for plane in &per_channel {
            out.push(plane[i]);
        }
    }
    out
}
