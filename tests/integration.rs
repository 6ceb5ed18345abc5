//! Integration tests for stream-media.
//!
//! These exercise the public API from the outside: stream decorators stacked
//! the way applications stack them, transforms fed by hand, and whole
//! pipelines delivering into sinks.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;

use stream_media::codec::{run_chain, PcmConverter, ProcessStatus, SilenceEffect, Transform};
use stream_media::format::encoding;
use stream_media::source::{DataSource, MockDataSource, MockPullStream, MockPushStream};
use stream_media::stream::{
    transfer_handler, PushStreamAdapter, RewritablePullStream, RewritablePushStream,
};
use stream_media::{
    AudioFormat, BufferLength, CacheConfig, CachingPushStream, ChannelSink, CodecRegistry,
    DtmfTone, Frame, MediaError, MediaFormat, MediaPipeline, PullStream, PushStream,
    SilenceConfig, Sink, SinkError, StreamEndpoint, TimestampMode, TranscodingSource,
};

const MS: i64 = 1_000_000;

fn linear(rate: f64) -> AudioFormat {
    AudioFormat::linear(rate, 16, 1)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    done()
}

// ============================================================================
// Stream decorators
// ============================================================================

#[test]
fn test_pull_adapter_into_cache_concatenates() {
    init_tracing();
    // three 5ms frames of 16kHz mono
    let pull = Arc::new(MockPullStream::new(linear(16000.0)));
    for value in 1..=3u8 {
        pull.push_frame(Frame::from_bytes(vec![value; 160], linear(16000.0)));
    }

    let adapter = PushStreamAdapter::new(pull);
    let cache = CachingPushStream::with_config(
        adapter.clone(),
        CacheConfig {
            target_buffer_length: BufferLength::Millis(20),
            ..CacheConfig::default()
        },
        None,
    );
    let notified = Arc::new(AtomicUsize::new(0));
    let counter = notified.clone();
    cache.set_transfer_handler(Some(transfer_handler(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })));

    adapter.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || cache.len() == 3));

    let mut out = Frame::with_byte_capacity(480);
    cache.read(&mut out).unwrap();
    assert_eq!(out.length, 480);
    let bytes = out.bytes().unwrap();
    assert!(bytes[..160].iter().all(|&b| b == 1));
    assert!(bytes[160..320].iter().all(|&b| b == 2));
    assert!(bytes[320..].iter().all(|&b| b == 3));
    assert_eq!(cache.buffered_duration(), Duration::ZERO);
    assert!(cache.is_empty());
    assert_eq!(notified.load(Ordering::SeqCst), 3);

    adapter.stop();
}

#[test]
fn test_stopped_adapter_ignores_late_frames() {
    let pull = Arc::new(MockPullStream::new(linear(8000.0)));
    pull.set_read_timeout(Duration::from_secs(2));
    let adapter = PushStreamAdapter::new(pull.clone());
    let notified = Arc::new(AtomicUsize::new(0));
    let counter = notified.clone();
    adapter.set_transfer_handler(Some(transfer_handler(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })));

    adapter.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || pull.pending_readers() == 1));
    adapter.stop();

    // the blocked read completes after stop has returned
    pull.push_frame(Frame::from_bytes(vec![9; 160], linear(8000.0)));
    assert!(wait_until(Duration::from_secs(2), || pull.pending_readers() == 0));
    std::thread::sleep(Duration::from_millis(20));

    assert_eq!(notified.load(Ordering::SeqCst), 0);
    let mut out = Frame::new();
    adapter.read(&mut out).unwrap();
    assert_eq!(out.length, 0);
}

#[test]
fn test_cache_delivers_in_order() {
    let upstream = Arc::new(MockPushStream::new(linear(8000.0)));
    let cache = CachingPushStream::with_config(
        upstream.clone(),
        CacheConfig {
            target_buffer_length: BufferLength::Millis(200),
            ..CacheConfig::default()
        },
        None,
    );
    cache.set_transfer_handler(Some(transfer_handler(|_| {})));

    // 20ms frames
    for value in 1..=4u8 {
        upstream.push_frame(Frame::from_bytes(vec![value; 320], linear(8000.0)));
    }
    assert_eq!(cache.len(), 4);
    assert_eq!(cache.buffered_duration(), Duration::from_millis(80));

    let mut seen = Vec::new();
    while !cache.is_empty() {
        let mut out = Frame::new();
        cache.read(&mut out).unwrap();
        seen.push(out.bytes().unwrap()[0]);
    }
    assert_eq!(seen, vec![1, 2, 3, 4]);
}

#[test]
fn test_mute_is_idempotent() {
    let pull = Arc::new(MockPullStream::new(linear(8000.0)));
    let stream = RewritablePullStream::new(pull.clone());
    let control = stream.control();
    control.set_mute(true);
    control.set_mute(true);

    for _ in 0..2 {
        pull.push_frame(Frame::from_bytes(vec![0x55; 320], linear(8000.0)));
        let mut out = Frame::new();
        stream.read(&mut out).unwrap();
        assert_eq!(out.length, 320);
        assert!(out.bytes().unwrap().iter().all(|&b| b == 0));
    }

    control.set_mute(false);
    pull.push_frame(Frame::from_bytes(vec![0x55; 320], linear(8000.0)));
    let mut out = Frame::new();
    stream.read(&mut out).unwrap();
    assert!(out.bytes().unwrap().iter().all(|&b| b == 0x55));
}

#[test]
fn test_dtmf_replaces_next_audio_frame() {
    let upstream = Arc::new(MockPushStream::new(linear(8000.0)));
    let stream = RewritablePushStream::new(upstream.clone());
    let (tx, rx) = std::sync::mpsc::channel();
    stream.set_transfer_handler(Some(transfer_handler(move |s| {
        let mut frame = Frame::new();
        if s.read(&mut frame).is_ok() {
            let _ = tx.send(frame);
        }
    })));

    let control = stream.control();
    control.add_dtmf(DtmfTone::from_char('5').unwrap());
    assert!(control.is_sending_dtmf());

    upstream.push_frame(Frame::from_bytes(vec![0; 320], linear(8000.0)));
    let toned = rx.recv().unwrap();
    assert!(toned.bytes().unwrap().iter().any(|&b| b != 0));
    assert!(!control.is_sending_dtmf());

    upstream.push_frame(Frame::from_bytes(vec![0; 320], linear(8000.0)));
    let plain = rx.recv().unwrap();
    assert!(plain.bytes().unwrap().iter().all(|&b| b == 0));
}

// ============================================================================
// Transforms
// ============================================================================

#[test]
fn test_converter_rejects_foreign_encoding() {
    let mut converter = PcmConverter::codec();
    let pcm: MediaFormat = linear(16000.0).into();
    assert!(converter.set_input_format(&pcm).is_some());

    let ulaw: MediaFormat = AudioFormat::new(encoding::ULAW).with_sample_rate(8000.0).into();
    assert!(converter.set_input_format(&ulaw).is_none());
    assert!(converter.input_format().unwrap().matches(&pcm));
}

#[test]
fn test_silence_fills_timestamp_gap() {
    let mut chain: Vec<Box<dyn Transform>> = vec![Box::new(SilenceEffect::codec(SilenceConfig {
        sample_rate: 16000,
        ..SilenceConfig::default()
    }))];

    // 20ms frames, the second one 20ms late
    let mut first = Frame::from_bytes(vec![3; 640], linear(16000.0));
    first.timestamp = 0;
    assert_eq!(run_chain(&mut chain, first).len(), 1);

    let mut late = Frame::from_bytes(vec![3; 640], linear(16000.0));
    late.timestamp = 40 * MS;
    let frames = run_chain(&mut chain, late);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].length, 640);
    assert_eq!(frames[0].timestamp, 20 * MS);
    assert!(frames[0].bytes().unwrap().iter().all(|&b| b == 0));
    assert!(frames[1].bytes().unwrap().iter().all(|&b| b == 3));
}

#[test]
fn test_silence_follows_rtp_wraparound() {
    let config = SilenceConfig {
        sample_rate: 8000,
        timestamp_mode: TimestampMode::Rtp { clock_rate: 8000 },
        ..SilenceConfig::default()
    };
    let mut effect = SilenceEffect::codec(config);
    let wrap = 1i64 << 32;

    // 20ms of 8kHz audio is 160 ticks
    let mut first = Frame::from_bytes(vec![1; 320], linear(8000.0));
    first.rtp_timestamp = wrap - 320;
    assert_eq!(effect.process(&mut first, &mut Frame::new()), ProcessStatus::OK);

    // the clock wrapped; the next frame is 320 ticks ahead of the expected 2^32 - 160
    let mut wrapped = Frame::from_bytes(vec![1; 320], linear(8000.0));
    wrapped.rtp_timestamp = 160;
    let mut silence = Frame::new();
    let status = effect.process(&mut wrapped, &mut silence);
    assert!(status.contains(ProcessStatus::INPUT_NOT_CONSUMED));
    assert_eq!(silence.length, 640);
    assert_eq!(silence.rtp_timestamp, wrap - 160);

    let mut out = Frame::new();
    assert_eq!(effect.process(&mut wrapped, &mut out), ProcessStatus::OK);
    assert_eq!(out.rtp_timestamp, 160);
    assert_eq!(effect.processor().total_samples_inserted(), 320);
}

// ============================================================================
// Transcoding
// ============================================================================

#[test]
fn test_transcoding_source_pull_track() {
    let format = AudioFormat::linear(48000.0, 16, 2);
    let pull = Arc::new(MockPullStream::new(format.clone()));
    let input = Arc::new(MockDataSource::new(vec![StreamEndpoint::Pull(pull.clone())]));
    let source =
        TranscodingSource::new(input.clone(), linear(8000.0), CodecRegistry::with_defaults());

    source.connect().unwrap();
    let streams = source.streams();
    let StreamEndpoint::Push(stream) = &streams[0] else {
        panic!("transcoded tracks are push streams");
    };
    let (tx, rx) = std::sync::mpsc::channel();
    stream.set_transfer_handler(Some(transfer_handler(move |s| {
        let mut frame = Frame::new();
        if s.read(&mut frame).is_ok() {
            let _ = tx.send(frame);
        }
    })));
    source.start().unwrap();

    // 20ms of 48kHz stereo becomes 20ms of 8kHz mono
    pull.push_frame(Frame::from_bytes(vec![0; 3840], format));
    let frame = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(frame.length, 320);

    source.stop().unwrap();
    source.disconnect();
    assert!(!input.is_connected());
}

// ============================================================================
// Pipelines
// ============================================================================

struct CountingSink {
    frames: Arc<AtomicU64>,
    started: Arc<AtomicUsize>,
}

#[async_trait]
impl Sink for CountingSink {
    fn name(&self) -> &str {
        "counting"
    }

    async fn on_start(&self) -> Result<(), SinkError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn write(&self, _frame: &Frame) -> Result<(), SinkError> {
        self.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_pipeline_fills_gaps_and_mutes() {
    init_tracing();
    let stream = Arc::new(MockPushStream::new(linear(16000.0)));
    let (tx, mut rx) = mpsc::channel::<Frame>(16);
    let session = MediaPipeline::builder()
        .push_source(stream.clone())
        .silence(SilenceConfig {
            sample_rate: 16000,
            ..SilenceConfig::default()
        })
        .cache(BufferLength::Millis(40))
        .rewritable()
        .add_sink(ChannelSink::new(tx))
        .start()
        .await
        .unwrap();

    let mut first = Frame::from_bytes(vec![4; 640], linear(16000.0));
    first.timestamp = 0;
    stream.push_frame(first);
    let mut late = Frame::from_bytes(vec![4; 640], linear(16000.0));
    late.timestamp = 40 * MS;
    stream.push_frame(late);

    let mut received = Vec::new();
    for _ in 0..3 {
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        received.push(frame.bytes().unwrap()[0]);
    }
    assert_eq!(received, vec![4, 0, 4]);

    session.rewritable_control().unwrap().set_mute(true);
    let mut next = Frame::from_bytes(vec![4; 640], linear(16000.0));
    next.timestamp = 60 * MS;
    stream.push_frame(next);
    let muted = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(muted.bytes().unwrap().iter().all(|&b| b == 0));

    let stats = session.stats();
    assert_eq!(stats.frames_read, 4);
    assert_eq!(stats.frames_dropped, 0);
    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_pipeline_with_custom_sink() {
    let frames = Arc::new(AtomicU64::new(0));
    let started = Arc::new(AtomicUsize::new(0));
    let stream = Arc::new(MockPushStream::new(linear(8000.0)));
    let session = MediaPipeline::builder()
        .push_source(stream.clone())
        .add_sink(CountingSink {
            frames: frames.clone(),
            started: started.clone(),
        })
        .start()
        .await
        .unwrap();
    assert_eq!(started.load(Ordering::SeqCst), 1);

    for _ in 0..5 {
        stream.push_frame(Frame::from_bytes(vec![1; 160], linear(8000.0)));
    }
    session.stop().await.unwrap();
    assert_eq!(frames.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_pipeline_over_transcoding_source() {
    init_tracing();
    let upstream = Arc::new(MockPushStream::new(AudioFormat::linear(48000.0, 16, 2)));
    let input = Arc::new(MockDataSource::new(vec![StreamEndpoint::Push(upstream.clone())]));
    let source = Arc::new(TranscodingSource::new(
        input.clone(),
        linear(16000.0),
        CodecRegistry::with_defaults(),
    ));

    let (tx, mut rx) = mpsc::channel::<Frame>(8);
    let session = MediaPipeline::builder()
        .source(source)
        .add_sink(ChannelSink::new(tx))
        .start()
        .await
        .unwrap();
    assert!(input.is_started());

    upstream.push_frame(Frame::from_bytes(vec![0; 1920], AudioFormat::linear(48000.0, 16, 2)));
    let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.length, 320);
    assert!(frame.format.unwrap().matches(&linear(16000.0).into()));

    session.stop().await.unwrap();
    assert!(!input.is_connected());
}

#[tokio::test]
async fn test_pipeline_requires_sinks() {
    let stream = Arc::new(MockPushStream::new(linear(8000.0)));
    let result = MediaPipeline::builder().push_source(stream).start().await;
    assert!(matches!(result, Err(MediaError::NoSinksConfigured)));
}
