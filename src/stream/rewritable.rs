//! Stream wrappers that can mute audio or splice in DTMF tones.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{transfer_handler, Control, PullStream, PushStream, TransferHandler};
use crate::dtmf::DtmfTone;
use crate::error::MediaError;
use crate::format::{encode_s16, Endian, MediaFormat};
use crate::frame::{Frame, Payload};

/// Mute and DTMF switches shared by a rewritable wrapper and its users.
#[derive(Debug, Default)]
pub struct RewritableControl {
    state: Mutex<RewriteState>,
}

#[derive(Debug, Default)]
struct RewriteState {
    mute: bool,
    tones: VecDeque<DtmfTone>,
}

impl RewritableControl {
    /// Creates an unmuted control with no tones queued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutes or unmutes the stream.
    pub fn set_mute(&self, mute: bool) {
        self.state.lock().mute = mute;
    }

    /// Returns `true` if the stream is muted.
    pub fn is_mute(&self) -> bool {
        self.state.lock().mute
    }

    /// Queues a tone to replace the audio of an upcoming frame.
    pub fn add_dtmf(&self, tone: DtmfTone) {
        tracing::debug!(key = %tone.key.as_char(), "dtmf tone queued");
        self.state.lock().tones.push_back(tone);
    }

    /// Returns `true` while tones are queued.
    pub fn is_sending_dtmf(&self) -> bool {
        !self.state.lock().tones.is_empty()
    }

    /// Applies the pending rewrite to a frame that was just read.
    ///
    /// A queued tone takes precedence over muting. Frames without audio data
    /// are left alone and keep the tone queued.
    pub fn rewrite(&self, frame: &mut Frame) {
        let carries_audio = !frame.is_discard()
            && !frame.payload.is_empty()
            && frame.length > 0
            && frame.format.as_ref().and_then(MediaFormat::as_audio).is_some();

        let (tone, mute) = {
            let mut state = self.state.lock();
            let tone = if carries_audio {
                state.tones.pop_front()
            } else {
                None
            };
            (tone, state.mute)
        };

        if let Some(tone) = tone {
            splice_dtmf(frame, &tone);
        } else if mute {
            mute_frame(frame);
        }
    }
}

/// Zeroes the active region of the frame.
fn mute_frame(frame: &mut Frame) {
    let start = frame.offset;
    let end = frame.offset + frame.length;
    match &mut frame.payload {
        Payload::Empty => {}
        Payload::Bytes(v) => zero(v, start, end),
        Payload::Shorts(v) => zero(v, start, end),
        Payload::Ints(v) => zero(v, start, end),
    }
}

fn zero<T: Default + Copy>(v: &mut [T], start: usize, end: usize) {
    let end = end.min(v.len());
    if start < end {
        v[start..end].fill(T::default());
    }
}

/// Replaces the active region of the frame with the tone's samples.
///
/// Elements before `offset` are kept. The new active region starts at the
/// same offset and spans the tone.
fn splice_dtmf(frame: &mut Frame, tone: &DtmfTone) {
    let Some(audio) = frame.format.as_ref().and_then(MediaFormat::as_audio) else {
        return;
    };
    let bits = audio.sample_size_in_bits.unwrap_or(16);
    if bits != 8 && bits != 16 {
        tracing::warn!(
            bits,
            key = %tone.key.as_char(),
            "dtmf needs 8- or 16-bit samples, frame left unmodified"
        );
        return;
    }
    let rate = audio.sample_rate.unwrap_or(8000.0);
    let endian = audio.endian.unwrap_or_default();

    let samples = tone.audio_samples(rate, bits);
    let tone_bytes: Vec<u8> = if bits == 8 {
        samples.iter().map(|&s| s as i8 as u8).collect()
    } else {
        encode_s16(&samples, endian)
    };

    let offset = frame.offset;
    let length = match &mut frame.payload {
        Payload::Empty => return,
        Payload::Bytes(v) => {
            v.truncate(offset);
            v.extend_from_slice(&tone_bytes);
            tone_bytes.len()
        }
        Payload::Shorts(v) => {
            let tone_shorts: Vec<i16> = if bits == 16 {
                samples
            } else {
                pack_shorts(&tone_bytes, endian)
            };
            v.truncate(offset);
            v.extend_from_slice(&tone_shorts);
            tone_shorts.len()
        }
        Payload::Ints(v) => {
            let tone_ints = pack_ints(&tone_bytes, endian);
            v.truncate(offset);
            v.extend_from_slice(&tone_ints);
            tone_ints.len()
        }
    };
    frame.length = length;
    frame.duration = samples_duration_ns(tone_bytes.len(), bits, rate).unwrap_or(frame.duration);
}

fn samples_duration_ns(bytes: usize, bits: u32, rate: f64) -> Option<i64> {
    if rate <= 0.0 {
        return None;
    }
    let samples = bytes as f64 / f64::from(bits / 8);
    Some((samples * 1e9 / rate).round() as i64)
}

fn pack_shorts(bytes: &[u8], endian: Endian) -> Vec<i16> {
    bytes
        .chunks(2)
        .map(|c| {
            let pair = [c[0], c.get(1).copied().unwrap_or(0)];
            match endian {
                Endian::Little => i16::from_le_bytes(pair),
                Endian::Big => i16::from_be_bytes(pair),
            }
        })
        .collect()
}

fn pack_ints(bytes: &[u8], endian: Endian) -> Vec<i32> {
    bytes
        .chunks(4)
        .map(|c| {
            let mut quad = [0u8; 4];
            quad[..c.len()].copy_from_slice(c);
            match endian {
                Endian::Little => i32::from_le_bytes(quad),
                Endian::Big => i32::from_be_bytes(quad),
            }
        })
        .collect()
}

/// A [`PushStream`] whose frames can be muted or replaced by DTMF tones.
pub struct RewritablePushStream {
    stream: Arc<dyn PushStream>,
    control: Arc<RewritableControl>,
    this: Weak<RewritablePushStream>,
}

impl RewritablePushStream {
    /// Wraps `stream` with a fresh control.
    pub fn new(stream: Arc<dyn PushStream>) -> Arc<Self> {
        Self::with_control(stream, Arc::new(RewritableControl::new()))
    }

    /// Wraps `stream`, sharing `control`.
    pub fn with_control(stream: Arc<dyn PushStream>, control: Arc<RewritableControl>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            stream,
            control,
            this: this.clone(),
        })
    }

    /// The control governing this wrapper.
    pub fn control(&self) -> Arc<RewritableControl> {
        self.control.clone()
    }
}

impl PushStream for RewritablePushStream {
    fn format(&self) -> Option<MediaFormat> {
        self.stream.format()
    }

    fn read(&self, frame: &mut Frame) -> Result<(), MediaError> {
        self.stream.read(frame)?;
        self.control.rewrite(frame);
        Ok(())
    }

    fn set_transfer_handler(&self, handler: Option<TransferHandler>) {
        let substitute = handler.map(|downstream| {
            let weak = self.this.clone();
            transfer_handler(move |_| {
                if let Some(wrapper) = weak.upgrade() {
                    downstream(wrapper.as_ref());
                }
            })
        });
        self.stream.set_transfer_handler(substitute);
    }

    fn end_of_stream(&self) -> bool {
        self.stream.end_of_stream()
    }

    fn controls(&self) -> Vec<Control> {
        let mut controls = self.stream.controls();
        controls.push(Control::Rewritable(self.control.clone()));
        controls
    }
}

/// A [`PullStream`] whose frames can be muted or replaced by DTMF tones.
pub struct RewritablePullStream {
    stream: Arc<dyn PullStream>,
    control: Arc<RewritableControl>,
}

impl RewritablePullStream {
    /// Wraps `stream` with a fresh control.
    pub fn new(stream: Arc<dyn PullStream>) -> Self {
        Self::with_control(stream, Arc::new(RewritableControl::new()))
    }

    /// Wraps `stream`, sharing `control`.
    pub fn with_control(stream: Arc<dyn PullStream>, control: Arc<RewritableControl>) -> Self {
        Self { stream, control }
    }

    /// The control governing this wrapper.
    pub fn control(&self) -> Arc<RewritableControl> {
        self.control.clone()
    }
}

impl PullStream for RewritablePullStream {
    fn format(&self) -> Option<MediaFormat> {
        self.stream.format()
    }

    fn read(&self, frame: &mut Frame) -> Result<(), MediaError> {
        self.stream.read(frame)?;
        self.control.rewrite(frame);
        Ok(())
    }

    fn end_of_stream(&self) -> bool {
        self.stream.end_of_stream()
    }

    fn will_read_block(&self) -> bool {
        self.stream.will_read_block()
    }

    fn controls(&self) -> Vec<Control> {
        let mut controls = self.stream.controls();
        controls.push(Control::Rewritable(self.control.clone()));
        controls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtmf::DtmfKey;
    use crate::format::AudioFormat;
    use crate::source::{MockPullStream, MockPushStream};
    use crate::stream::find_rewritable_control;
    use std::time::Duration;

    fn linear8k() -> AudioFormat {
        AudioFormat::linear(8000.0, 16, 1)
    }

    fn short_tone() -> DtmfTone {
        DtmfTone {
            tone_duration: Duration::from_millis(10),
            inter_digit_interval: Duration::from_millis(5),
            ..DtmfTone::new(DtmfKey::One)
        }
    }

    #[test]
    fn test_mute_zeroes_active_region_only() {
        let control = RewritableControl::new();
        control.set_mute(true);
        let mut f = Frame::from_bytes(vec![9; 10], linear8k());
        f.offset = 2;
        f.length = 4;
        control.rewrite(&mut f);
        let Payload::Bytes(v) = &f.payload else { panic!("expected bytes") };
        assert_eq!(v, &vec![9, 9, 0, 0, 0, 0, 9, 9, 9, 9]);
    }

    #[test]
    fn test_mute_is_idempotent() {
        let control = RewritableControl::new();
        control.set_mute(true);
        control.set_mute(true);
        assert!(control.is_mute());

        let mut f = Frame::new();
        f.payload = Payload::Shorts(vec![5; 8]);
        f.length = 8;
        f.format = Some(linear8k().into());
        control.rewrite(&mut f);
        let once = f.clone();
        control.rewrite(&mut f);
        assert_eq!(f, once);
        assert_eq!(f.shorts().unwrap(), &[0i16; 8][..]);
    }

    #[test]
    fn test_unmuted_frame_untouched() {
        let control = RewritableControl::new();
        let mut f = Frame::from_bytes(vec![3; 4], linear8k());
        let before = f.clone();
        control.rewrite(&mut f);
        assert_eq!(f, before);
    }

    #[test]
    fn test_dtmf_replaces_region_and_keeps_prefix() {
        let control = RewritableControl::new();
        control.add_dtmf(short_tone());
        assert!(control.is_sending_dtmf());

        let mut f = Frame::from_bytes(vec![0xAA; 320], linear8k());
        f.offset = 4;
        f.length = 316;
        control.rewrite(&mut f);

        // 5 + 10 + 5 ms at 8 kHz, 2 bytes per sample
        assert_eq!(f.length, 160 * 2);
        assert_eq!(f.offset, 4);
        let Payload::Bytes(v) = &f.payload else { panic!("expected bytes") };
        assert_eq!(&v[..4], &[0xAA; 4]);
        assert_eq!(v.len(), 4 + 320);
        assert!(!control.is_sending_dtmf());
        assert_eq!(f.duration, 20_000_000);
    }

    #[test]
    fn test_dtmf_big_endian_packing() {
        let control = RewritableControl::new();
        let tone = short_tone();
        control.add_dtmf(tone.clone());
        let format = linear8k().with_endian(Endian::Big);
        let mut f = Frame::from_bytes(vec![0; 320], format);
        control.rewrite(&mut f);

        let expected = encode_s16(&tone.audio_samples(8000.0, 16), Endian::Big);
        assert_eq!(f.bytes().unwrap(), &expected[..]);
    }

    #[test]
    fn test_dtmf_eight_bit() {
        let control = RewritableControl::new();
        control.add_dtmf(short_tone());
        let format = AudioFormat::linear(8000.0, 8, 1);
        let mut f = Frame::from_bytes(vec![0; 160], format);
        control.rewrite(&mut f);
        assert_eq!(f.length, 160);
    }

    #[test]
    fn test_dtmf_short_payload() {
        let control = RewritableControl::new();
        control.add_dtmf(short_tone());
        let mut f = Frame::new();
        f.payload = Payload::Shorts(vec![1; 200]);
        f.offset = 1;
        f.length = 100;
        f.format = Some(linear8k().into());
        control.rewrite(&mut f);
        assert_eq!(f.length, 160);
        assert_eq!(f.payload.capacity(), 161);
        assert_eq!(&f.shorts().unwrap()[..], &short_tone().audio_samples(8000.0, 16)[..]);
    }

    #[test]
    fn test_dtmf_then_mute() {
        let control = RewritableControl::new();
        control.set_mute(true);
        control.add_dtmf(short_tone());

        let mut first = Frame::from_bytes(vec![1; 320], linear8k());
        control.rewrite(&mut first);
        assert!(first.bytes().unwrap().iter().any(|&b| b != 0));

        let mut second = Frame::from_bytes(vec![1; 320], linear8k());
        control.rewrite(&mut second);
        assert!(second.bytes().unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_unsupported_width_consumes_tone() {
        let control = RewritableControl::new();
        control.add_dtmf(short_tone());
        let format = AudioFormat::linear(8000.0, 24, 1);
        let mut f = Frame::from_bytes(vec![7; 30], format);
        let before = f.clone();
        control.rewrite(&mut f);
        assert_eq!(f, before);
        assert!(!control.is_sending_dtmf());
    }

    #[test]
    fn test_discard_keeps_tone_queued() {
        let control = RewritableControl::new();
        control.add_dtmf(short_tone());
        let mut f = Frame::discard();
        control.rewrite(&mut f);
        assert!(control.is_sending_dtmf());
    }

    #[test]
    fn test_empty_read_keeps_tone_queued() {
        let control = RewritableControl::new();
        control.add_dtmf(short_tone());
        let mut f = Frame::from_bytes(vec![0x55; 320], linear8k());
        f.length = 0;
        let before = f.clone();
        control.rewrite(&mut f);
        assert_eq!(f, before);
        assert!(control.is_sending_dtmf());

        let mut next = Frame::from_bytes(vec![0x55; 320], linear8k());
        control.rewrite(&mut next);
        assert!(!control.is_sending_dtmf());
        assert_eq!(next.length, 320);
    }

    #[test]
    fn test_push_wrapper_forwards_itself() {
        let upstream = Arc::new(MockPushStream::new(linear8k()));
        let wrapper = RewritablePushStream::new(upstream.clone());
        wrapper.control().set_mute(true);

        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        wrapper.set_transfer_handler(Some(transfer_handler(move |stream| {
            let mut f = Frame::new();
            stream.read(&mut f).unwrap();
            *s.lock() = Some(f);
        })));
        upstream.push_frame(Frame::from_bytes(vec![4; 16], linear8k()));

        let frame = seen.lock().take().unwrap();
        assert!(frame.bytes().unwrap().iter().all(|&b| b == 0));
        assert!(find_rewritable_control(&wrapper.controls()).is_some());
    }

    #[test]
    fn test_pull_wrapper_mutes() {
        let upstream = Arc::new(MockPullStream::new(linear8k()));
        upstream.push_frame(Frame::from_bytes(vec![4; 16], linear8k()));
        let wrapper = RewritablePullStream::new(upstream);
        wrapper.control().set_mute(true);
        let mut f = Frame::new();
        wrapper.read(&mut f).unwrap();
        assert_eq!(f.length, 16);
        assert!(f.bytes().unwrap().iter().all(|&b| b == 0));
    }
}
