//! Mock streams and sources for testing without hardware.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::DataSource;
use crate::error::MediaError;
use crate::format::{encode_s16, AudioFormat, Endian, MediaFormat};
use crate::frame::Frame;
use crate::stream::{PullStream, PushStream, StreamEndpoint, TransferHandler};

/// Generates synthetic PCM for tests.
///
/// # Example
///
/// ```
/// use stream_media::source::SignalGenerator;
///
/// let mut signal = SignalGenerator::new(16000, 1);
///
/// // 100ms of silence followed by 100ms of a 440Hz sine wave
/// signal.generate_silence(100);
/// signal.generate_sine(440.0, 100);
///
/// let frames = signal.into_frames(20);
/// assert_eq!(frames.len(), 10);
/// assert_eq!(frames[1].timestamp, 20_000_000);
/// ```
pub struct SignalGenerator {
    sample_rate: u32,
    channels: u16,
    samples: Vec<i16>,
}

impl SignalGenerator {
    /// Creates a generator for the given format.
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            samples: Vec::new(),
        }
    }

    /// 16kHz mono, the usual speech format.
    pub fn wideband() -> Self {
        Self::new(16000, 1)
    }

    /// Format of the generated frames.
    pub fn format(&self) -> AudioFormat {
        AudioFormat::linear(f64::from(self.sample_rate), 16, self.channels)
    }

    /// Generates silence for the given duration in milliseconds.
    pub fn generate_silence(&mut self, duration_ms: u64) {
        let num_samples = self.samples_for_duration(duration_ms);
        self.samples
            .extend(std::iter::repeat(0i16).take(num_samples));
    }

    /// Generates a sine wave at the given frequency for the given duration.
    pub fn generate_sine(&mut self, frequency: f64, duration_ms: u64) {
        let num_frames = self.samples_for_duration(duration_ms) / self.channels as usize;
        let sample_rate = f64::from(self.sample_rate);

        for i in 0..num_frames {
            let t = i as f64 / sample_rate;
            let value = (2.0 * std::f64::consts::PI * frequency * t).sin();
            let sample = (value * 32767.0) as i16;

            // Write same sample to all channels
            for _ in 0..self.channels {
                self.samples.push(sample);
            }
        }
    }

    /// Generates deterministic white noise for the given duration.
    pub fn generate_noise(&mut self, duration_ms: u64, amplitude: f64) {
        let num_samples = self.samples_for_duration(duration_ms);
        let amplitude = (amplitude * 32767.0) as i16;

        let mut seed: u32 = 12345;
        for _ in 0..num_samples {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let random = ((seed >> 16) as i32 - 32768) as i16;
            let sample = (i32::from(random) * i32::from(amplitude) / 32767) as i16;
            self.samples.push(sample);
        }
    }

    /// Adds raw samples directly.
    pub fn add_samples(&mut self, samples: &[i16]) {
        self.samples.extend_from_slice(samples);
    }

    /// Takes all accumulated samples, clearing the internal buffer.
    pub fn take_samples(&mut self) -> Vec<i16> {
        std::mem::take(&mut self.samples)
    }

    /// Returns the accumulated samples.
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Returns the duration of accumulated samples.
    pub fn duration(&self) -> Duration {
        let frames = self.samples.len() / self.channels as usize;
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate))
    }

    /// Splits the accumulated samples into little-endian byte frames of
    /// `frame_ms` each, timestamped from zero. A trailing partial frame is
    /// kept.
    pub fn into_frames(self, frame_ms: u64) -> Vec<Frame> {
        let format = self.format();
        let per_frame = self.samples_for_duration(frame_ms).max(1);
        let frame_nanos = i64::try_from(frame_ms * 1_000_000).unwrap_or(i64::MAX);
        self.samples
            .chunks(per_frame)
            .zip(0i64..)
            .map(|(chunk, i)| {
                let mut frame =
                    Frame::from_bytes(encode_s16(chunk, Endian::Little), format.clone());
                frame.timestamp = i * frame_nanos;
                frame.sequence_number = i;
                frame.duration = format
                    .duration_of(frame.length)
                    .and_then(|d| i64::try_from(d.as_nanos()).ok())
                    .unwrap_or(frame_nanos);
                frame
            })
            .collect()
    }

    fn samples_for_duration(&self, duration_ms: u64) -> usize {
        let frames = (self.sample_rate as u64 * duration_ms / 1000) as usize;
        frames * self.channels as usize
    }
}

fn injected_error(message: String) -> MediaError {
    MediaError::Io(io::Error::other(message))
}

/// How long a [`MockPullStream`] read waits for data by default.
pub const DEFAULT_MOCK_READ_TIMEOUT: Duration = Duration::from_millis(100);

struct PullState {
    frames: VecDeque<Frame>,
    fail: Option<String>,
    closed: bool,
    readers: usize,
    read_timeout: Duration,
}

/// A blocking stream fed by the test.
///
/// `read` waits until a frame is pushed, the stream is closed or the read
/// timeout elapses. On timeout the frame comes back flagged discard.
pub struct MockPullStream {
    format: MediaFormat,
    state: Mutex<PullState>,
    ready: Condvar,
}

impl MockPullStream {
    /// Creates an empty stream of `format`.
    pub fn new(format: impl Into<MediaFormat>) -> Self {
        Self {
            format: format.into(),
            state: Mutex::new(PullState {
                frames: VecDeque::new(),
                fail: None,
                closed: false,
                readers: 0,
                read_timeout: DEFAULT_MOCK_READ_TIMEOUT,
            }),
            ready: Condvar::new(),
        }
    }

    /// Makes `frame` available and wakes a blocked reader.
    pub fn push_frame(&self, frame: Frame) {
        self.state.lock().frames.push_back(frame);
        self.ready.notify_all();
    }

    /// Makes the next read fail with `message`.
    pub fn fail_next_read(&self, message: impl Into<String>) {
        self.state.lock().fail = Some(message.into());
        self.ready.notify_all();
    }

    /// Sets how long a read waits for data.
    pub fn set_read_timeout(&self, timeout: Duration) {
        self.state.lock().read_timeout = timeout;
    }

    /// Number of threads currently blocked in `read`.
    pub fn pending_readers(&self) -> usize {
        self.state.lock().readers
    }

    /// Ends the stream. Queued frames are still delivered, then reads return
    /// end-of-media frames.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }
}

impl PullStream for MockPullStream {
    fn format(&self) -> Option<MediaFormat> {
        Some(self.format.clone())
    }

    fn read(&self, frame: &mut Frame) -> Result<(), MediaError> {
        let mut state = self.state.lock();
        let deadline = Instant::now() + state.read_timeout;
        state.readers += 1;
        let result = loop {
            if let Some(message) = state.fail.take() {
                break Err(injected_error(message));
            }
            if let Some(next) = state.frames.pop_front() {
                *frame = next;
                break Ok(());
            }
            if state.closed {
                *frame = Frame::eom();
                break Ok(());
            }
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                *frame = Frame::discard();
                break Ok(());
            }
        };
        state.readers -= 1;
        result
    }

    fn end_of_stream(&self) -> bool {
        let state = self.state.lock();
        state.closed && state.frames.is_empty()
    }

    fn will_read_block(&self) -> bool {
        let state = self.state.lock();
        state.frames.is_empty() && state.fail.is_none() && !state.closed
    }
}

/// A notifying stream fed by the test.
///
/// [`push_frame`](Self::push_frame) queues a frame and calls the registered
/// handler on the caller's thread. `read` pops the oldest queued frame.
pub struct MockPushStream {
    format: MediaFormat,
    frames: Mutex<VecDeque<Frame>>,
    handler: Mutex<Option<TransferHandler>>,
    fail: Mutex<Option<String>>,
    ended: AtomicBool,
}

impl MockPushStream {
    /// Creates an empty stream of `format`.
    pub fn new(format: impl Into<MediaFormat>) -> Self {
        Self {
            format: format.into(),
            frames: Mutex::new(VecDeque::new()),
            handler: Mutex::new(None),
            fail: Mutex::new(None),
            ended: AtomicBool::new(false),
        }
    }

    /// Queues `frame` and notifies the handler.
    pub fn push_frame(&self, frame: Frame) {
        self.queue_frame(frame);
        self.notify();
    }

    /// Queues `frame` without notifying.
    pub fn queue_frame(&self, frame: Frame) {
        self.frames.lock().push_back(frame);
    }

    /// Number of queued frames not yet read.
    pub fn pending(&self) -> usize {
        self.frames.lock().len()
    }

    /// The currently registered handler.
    pub fn handler(&self) -> Option<TransferHandler> {
        self.handler.lock().clone()
    }

    /// Makes the next read fail with `message`.
    pub fn fail_next_read(&self, message: impl Into<String>) {
        *self.fail.lock() = Some(message.into());
    }

    /// Queues an end-of-media frame, notifies, and marks the stream ended.
    pub fn close(&self) {
        self.ended.store(true, Ordering::SeqCst);
        self.push_frame(Frame::eom());
    }

    fn notify(&self) {
        // called without holding any of our locks
        if let Some(handler) = self.handler() {
            handler(self);
        }
    }
}

impl PushStream for MockPushStream {
    fn format(&self) -> Option<MediaFormat> {
        Some(self.format.clone())
    }

    fn read(&self, frame: &mut Frame) -> Result<(), MediaError> {
        if let Some(message) = self.fail.lock().take() {
            return Err(injected_error(message));
        }
        match self.frames.lock().pop_front() {
            Some(next) => *frame = next,
            None => frame.length = 0,
        }
        Ok(())
    }

    fn set_transfer_handler(&self, handler: Option<TransferHandler>) {
        *self.handler.lock() = handler;
    }

    fn end_of_stream(&self) -> bool {
        self.ended.load(Ordering::SeqCst) && self.frames.lock().is_empty()
    }
}

/// A data source over a test-controlled list of streams.
pub struct MockDataSource {
    streams: Mutex<Vec<StreamEndpoint>>,
    connected: AtomicBool,
    started: AtomicBool,
}

impl MockDataSource {
    /// Creates a source offering `streams`.
    pub fn new(streams: Vec<StreamEndpoint>) -> Self {
        Self {
            streams: Mutex::new(streams),
            connected: AtomicBool::new(false),
            started: AtomicBool::new(false),
        }
    }

    /// Replaces the offered streams.
    pub fn set_streams(&self, streams: Vec<StreamEndpoint>) {
        *self.streams.lock() = streams;
    }

    /// Returns `true` between `start` and `stop`.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Returns `true` between `connect` and `disconnect`.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl DataSource for MockDataSource {
    fn connect(&self) -> Result<(), MediaError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self) {
        self.started.store(false, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn start(&self) -> Result<(), MediaError> {
        if !self.is_connected() {
            return Err(MediaError::NotConnected);
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<(), MediaError> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn streams(&self) -> Vec<StreamEndpoint> {
        self.streams.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::transfer_handler;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    fn linear() -> AudioFormat {
        AudioFormat::linear(16000.0, 16, 1)
    }

    #[test]
    fn test_signal_silence() {
        let mut signal = SignalGenerator::new(16000, 1);
        signal.generate_silence(100);

        let samples = signal.take_samples();
        assert_eq!(samples.len(), 1600);
        assert!(samples.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_signal_sine() {
        let mut signal = SignalGenerator::new(16000, 1);
        signal.generate_sine(440.0, 100);

        let samples = signal.samples();
        assert_eq!(samples.len(), 1600);
        assert!(samples.iter().any(|&s| s > 0));
        assert!(samples.iter().any(|&s| s < 0));
    }

    #[test]
    fn test_signal_stereo_duration() {
        let mut signal = SignalGenerator::new(48000, 2);
        signal.generate_noise(100, 0.5);
        assert_eq!(signal.samples().len(), 9600);
        assert_eq!(signal.duration(), Duration::from_millis(100));
    }

    #[test]
    fn test_into_frames_timestamps() {
        let mut signal = SignalGenerator::wideband();
        signal.generate_silence(50);
        let frames = signal.into_frames(20);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].length, 640);
        assert_eq!(frames[2].length, 320);
        assert_eq!(frames[2].timestamp, 40_000_000);
        assert_eq!(frames[2].duration, 10_000_000);
    }

    #[test]
    fn test_pull_read_times_out_with_discard() {
        let pull = MockPullStream::new(linear());
        pull.set_read_timeout(Duration::from_millis(5));
        let mut f = Frame::new();
        pull.read(&mut f).unwrap();
        assert!(f.is_discard());
        assert!(pull.will_read_block());
    }

    #[test]
    fn test_pull_read_wakes_on_push() {
        let pull = Arc::new(MockPullStream::new(linear()));
        pull.set_read_timeout(Duration::from_secs(5));
        let reader = {
            let pull = pull.clone();
            thread::spawn(move || {
                let mut f = Frame::new();
                pull.read(&mut f).unwrap();
                f
            })
        };
        while pull.pending_readers() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        pull.push_frame(Frame::from_bytes(vec![3; 4], linear()));
        assert_eq!(reader.join().unwrap().length, 4);
    }

    #[test]
    fn test_pull_close_delivers_queue_then_eom() {
        let pull = MockPullStream::new(linear());
        pull.push_frame(Frame::from_bytes(vec![1; 4], linear()));
        pull.close();
        assert!(!pull.end_of_stream());
        let mut f = Frame::new();
        pull.read(&mut f).unwrap();
        assert_eq!(f.length, 4);
        pull.read(&mut f).unwrap();
        assert!(f.is_eom());
        assert!(pull.end_of_stream());
    }

    #[test]
    fn test_push_notifies_handler() {
        let push = MockPushStream::new(linear());
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        push.set_transfer_handler(Some(transfer_handler(move |stream| {
            let mut f = Frame::new();
            stream.read(&mut f).unwrap();
            s.fetch_add(f.length, Ordering::SeqCst);
        })));
        push.push_frame(Frame::from_bytes(vec![0; 8], linear()));
        assert_eq!(seen.load(Ordering::SeqCst), 8);
        assert_eq!(push.pending(), 0);
    }

    #[test]
    fn test_push_read_failure_once() {
        let push = MockPushStream::new(linear());
        push.fail_next_read("boom");
        let mut f = Frame::new();
        assert!(push.read(&mut f).unwrap_err().to_string().contains("boom"));
        push.read(&mut f).unwrap();
        assert_eq!(f.length, 0);
    }

    #[test]
    fn test_data_source_requires_connect() {
        let source = MockDataSource::new(Vec::new());
        assert!(matches!(source.start(), Err(MediaError::NotConnected)));
        source.connect().unwrap();
        source.start().unwrap();
        assert!(source.is_started());
        source.disconnect();
        assert!(!source.is_started() && !source.is_connected());
    }
}
