//! Tokio mpsc channel sink.

use crate::sink::Sink;
use crate::{Frame, SinkError};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A sink that sends every frame to a tokio mpsc channel.
///
/// `write` waits for channel capacity, so a slow receiver holds back the
/// router rather than losing frames at this point.
///
/// # Example
///
/// ```
/// use stream_media::{ChannelSink, Frame};
/// use tokio::sync::mpsc;
///
/// let (tx, mut rx) = mpsc::channel::<Frame>(100);
/// let sink = ChannelSink::new(tx);
/// // hand the sink to MediaPipeline::builder(), then:
/// // while let Some(frame) = rx.recv().await { ... }
/// ```
pub struct ChannelSink {
    name: String,
    sender: mpsc::Sender<Frame>,
}

impl ChannelSink {
    /// Creates a channel sink named `channel`.
    pub fn new(sender: mpsc::Sender<Frame>) -> Self {
        Self::with_name("channel", sender)
    }

    /// Creates a channel sink with a custom name.
    pub fn with_name(name: impl Into<String>, sender: mpsc::Sender<Frame>) -> Self {
        Self {
            name: name.into(),
            sender,
        }
    }
}

#[async_trait]
impl Sink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, frame: &Frame) -> Result<(), SinkError> {
        self.sender
            .send(frame.clone())
            .await
            .map_err(|_| SinkError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AudioFormat;

    #[tokio::test]
    async fn test_channel_sink_sends_frames() {
        let (tx, mut rx) = mpsc::channel::<Frame>(10);
        let sink = ChannelSink::new(tx);
        let mut frame = Frame::from_bytes(vec![1, 2, 3, 4], AudioFormat::linear(8000.0, 16, 1));
        frame.sequence_number = 7;
        sink.write(&frame).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.bytes(), Some(&[1u8, 2, 3, 4][..]));
        assert_eq!(received.sequence_number, 7);
    }

    #[tokio::test]
    async fn test_channel_sink_closed() {
        let (tx, rx) = mpsc::channel::<Frame>(10);
        let sink = ChannelSink::new(tx);
        drop(rx);
        let result = sink.write(&Frame::new()).await;
        assert!(matches!(result, Err(SinkError::Closed)));
    }

    #[tokio::test]
    async fn test_channel_sink_custom_name() {
        let (tx, _rx) = mpsc::channel::<Frame>(10);
        assert_eq!(ChannelSink::with_name("asr", tx).name(), "asr");
    }
}
