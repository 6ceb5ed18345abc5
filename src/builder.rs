//! Builder pattern for `MediaPipeline`.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::codec::{CodecRegistry, SilenceEffect, Transform};
use crate::pipeline::{Bridge, BridgeConfig, Router, RouterCommand};
use crate::session::{Session, SessionState};
use crate::sink::Sink;
use crate::source::DataSource;
use crate::stream::{
    CachingPushStream, PullStream, PushDataSourceAdapter, PushStream, RewritablePushStream,
    StreamEndpoint, TransformingPushStream, DEFAULT_PENDING_CAPACITY,
};
use crate::{
    event_callback, BufferLength, CacheConfig, EventCallback, FormatPreset, MediaError,
    MediaEvent, PipelineConfig, SilenceConfig,
};

/// Channel capacity for router commands. Only `Stop` is ever sent.
const COMMAND_CHANNEL_CAPACITY: usize = 1;

/// A single stream presented as a data source with no lifecycle of its own.
struct SingleStreamSource {
    endpoint: StreamEndpoint,
}

impl DataSource for SingleStreamSource {
    fn connect(&self) -> Result<(), MediaError> {
        Ok(())
    }

    fn disconnect(&self) {}

    fn start(&self) -> Result<(), MediaError> {
        Ok(())
    }

    fn stop(&self) -> Result<(), MediaError> {
        Ok(())
    }

    fn streams(&self) -> Vec<StreamEndpoint> {
        vec![self.endpoint.clone()]
    }
}

/// Builder for assembling and starting a pipeline.
///
/// Each stream of the source is decorated, innermost first, with:
///
/// 1. a pull-to-push adapter, for pull streams
/// 2. format conversion, when [`format`](Self::format) names a target
/// 3. silence insertion, when [`silence`](Self::silence) is set
/// 4. a frame cache, when [`cache`](Self::cache) is set
/// 5. a mute/DTMF wrapper, when [`rewritable`](Self::rewritable) is set
///
/// and the outermost stream feeds every sink.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use stream_media::source::MockPushStream;
/// use stream_media::{AudioFormat, BufferLength, ChannelSink, Frame, MediaPipeline};
/// use tokio::sync::mpsc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), stream_media::MediaError> {
/// let format = AudioFormat::linear(16000.0, 16, 1);
/// let stream = Arc::new(MockPushStream::new(format.clone()));
/// let (tx, mut rx) = mpsc::channel::<Frame>(32);
///
/// let session = MediaPipeline::builder()
///     .push_source(stream.clone())
///     .rewritable()
///     .add_sink(ChannelSink::new(tx))
///     .start()
///     .await?;
///
/// stream.push_frame(Frame::from_bytes(vec![1; 320], format));
/// let frame = rx.recv().await.expect("frame delivered");
/// assert_eq!(frame.length, 320);
///
/// session.stop().await?;
/// # Ok(())
/// # }
/// ```
#[must_use]
pub struct MediaPipelineBuilder {
    source: Option<Arc<dyn DataSource>>,
    format: FormatPreset,
    registry: CodecRegistry,
    silence: Option<SilenceConfig>,
    rewritable: bool,
    sinks: Vec<Arc<dyn Sink>>,
    event_callback: Option<EventCallback>,
    config: PipelineConfig,
}

impl Default for MediaPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaPipelineBuilder {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self {
            source: None,
            format: FormatPreset::Native,
            registry: CodecRegistry::with_defaults(),
            silence: None,
            rewritable: false,
            sinks: Vec::new(),
            event_callback: None,
            config: PipelineConfig::default(),
        }
    }

    /// Reads from a blocking pull stream. A `pull-adapter` thread drives it
    /// while the pipeline runs.
    pub fn pull_source(self, stream: Arc<dyn PullStream>) -> Self {
        self.stream_source(StreamEndpoint::Pull(stream))
    }

    /// Reads from a push stream.
    pub fn push_source(self, stream: Arc<dyn PushStream>) -> Self {
        self.stream_source(StreamEndpoint::Push(stream))
    }

    /// Reads every stream of a data source. The pipeline connects, starts,
    /// stops and disconnects it.
    pub fn source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.source = Some(source);
        self
    }

    fn stream_source(self, endpoint: StreamEndpoint) -> Self {
        self.source(Arc::new(SingleStreamSource { endpoint }))
    }

    /// Converts every stream to a preset format.
    ///
    /// Default: [`FormatPreset::Native`] (no conversion)
    pub fn format(mut self, format: FormatPreset) -> Self {
        self.format = format;
        self
    }

    /// Sets the transforms available for format conversion.
    ///
    /// Default: [`CodecRegistry::with_defaults()`]
    pub fn registry(mut self, registry: CodecRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Caches frames with the given buffering target.
    ///
    /// [`BufferLength::Default`] selects
    /// [`BufferLength::PIPELINE_DEFAULT`].
    pub fn cache(mut self, target: BufferLength) -> Self {
        let base = self.config.cache.take().unwrap_or_default();
        self.config.cache = Some(CacheConfig {
            target_buffer_length: target,
            ..base
        });
        self
    }

    /// Lets the session mute the stream or replace it with DTMF tones.
    pub fn rewritable(mut self) -> Self {
        self.rewritable = true;
        self
    }

    /// Fills timestamp gaps with silence.
    pub fn silence(mut self, config: SilenceConfig) -> Self {
        self.silence = Some(config);
        self
    }

    /// Adds a sink receiving every frame.
    pub fn add_sink<S: Sink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Sets a callback to receive runtime events.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(MediaEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
        self
    }

    /// Sets custom pipeline configuration.
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    fn validate(&self) -> Result<Arc<dyn DataSource>, MediaError> {
        let source = self.source.clone().ok_or(MediaError::NoSourceConfigured)?;
        if self.sinks.is_empty() {
            return Err(MediaError::NoSinksConfigured);
        }
        Ok(source)
    }

    /// Wraps one stream in the configured decorators.
    fn decorate(&self, stream: Arc<dyn PushStream>) -> Result<Arc<dyn PushStream>, MediaError> {
        let mut chain: Vec<Box<dyn Transform>> = Vec::new();
        let mut current = stream.format();

        if let Some(target) = self.format.format() {
            let from = current
                .clone()
                .ok_or_else(|| MediaError::unsupported_format("unknown stream format"))?;
            let conversion = self
                .registry
                .find_chain(&from, &target)
                .ok_or_else(|| MediaError::unsupported_format(&target))?;
            if let Some(last) = conversion.last() {
                current = last.output_format().cloned();
            }
            chain.extend(conversion);
        }

        if let Some(config) = &self.silence {
            let mut effect = SilenceEffect::codec(config.clone());
            let accepted = current.as_ref().and_then(|f| effect.set_input_format(f));
            if accepted.is_none() {
                let shown = current.map_or_else(|| "unknown".to_string(), |f| f.to_string());
                return Err(MediaError::unsupported_format(format!(
                    "{shown} (silence insertion needs {})",
                    SilenceEffect::supported_format(config.sample_rate)
                )));
            }
            chain.push(Box::new(effect));
        }

        let stream: Arc<dyn PushStream> = if chain.is_empty() {
            stream
        } else {
            TransformingPushStream::with_options(
                stream,
                chain,
                DEFAULT_PENDING_CAPACITY,
                self.event_callback.clone(),
            )?
        };

        let stream: Arc<dyn PushStream> = match &self.config.cache {
            Some(cache) => {
                let mut cache = cache.clone();
                if cache.target_buffer_length == BufferLength::Default {
                    cache.target_buffer_length = BufferLength::PIPELINE_DEFAULT;
                }
                CachingPushStream::with_config(stream, cache, self.event_callback.clone())
            }
            None => stream,
        };

        let stream: Arc<dyn PushStream> = if self.rewritable {
            RewritablePushStream::new(stream)
        } else {
            stream
        };
        Ok(stream)
    }

    fn decorate_all(
        &self,
        source: &PushDataSourceAdapter,
    ) -> Result<Vec<Arc<dyn PushStream>>, MediaError> {
        let mut streams = Vec::new();
        for endpoint in source.streams() {
            let StreamEndpoint::Push(stream) = endpoint else {
                continue;
            };
            streams.push(self.decorate(stream)?);
        }
        if streams.is_empty() {
            return Err(MediaError::unavailable("pipeline", "source offers no streams"));
        }
        Ok(streams)
    }

    /// Connects the source, starts the sinks and lets frames flow.
    ///
    /// Returns a [`Session`] handle to control the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No source or no sink is configured
    /// - The source cannot be connected or started
    /// - A stream cannot be converted to the configured format
    /// - Any sink fails to start
    pub async fn start(self) -> Result<Session, MediaError> {
        let inner = self.validate()?;
        let source = Arc::new(PushDataSourceAdapter::with_options(
            inner,
            self.config.strict_stop,
            self.event_callback.clone(),
        ));
        source.connect()?;

        let streams = match self.decorate_all(&source) {
            Ok(streams) => streams,
            Err(e) => {
                source.disconnect();
                return Err(e);
            }
        };

        let capacity = self.config.frame_channel_capacity.max(1);
        let (frame_tx, frame_rx) = mpsc::channel(capacity);
        let (router_cmd_tx, router_cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let state = Arc::new(SessionState::new());

        let router = Router::new(self.sinks.clone(), self.config.clone())
            .with_event_callback(self.event_callback.clone())
            .with_state(state.clone());
        if let Err(e) = router.start_sinks().await {
            source.disconnect();
            return Err(e);
        }
        let router_handle = tokio::spawn(async move {
            router.run(frame_rx, router_cmd_rx).await;
        });

        let mut controls = Vec::new();
        let mut bridges = Vec::with_capacity(streams.len());
        for (index, stream) in streams.into_iter().enumerate() {
            controls.extend(stream.controls());
            let config = BridgeConfig {
                name: format!("stream-{index}"),
                read_size: self.config.read_size_bytes,
                channel_capacity: capacity,
            };
            bridges.push(Bridge::attach(
                stream,
                frame_tx.clone(),
                state.clone(),
                config,
                self.event_callback.clone(),
            ));
        }
        drop(frame_tx);

        if let Err(e) = source.start() {
            for bridge in &bridges {
                bridge.detach();
            }
            let _ = router_cmd_tx.send(RouterCommand::Stop).await;
            let _ = router_handle.await;
            source.disconnect();
            return Err(e);
        }

        tracing::info!(
            streams = bridges.len(),
            sinks = self.sinks.len(),
            format = ?self.format,
            "pipeline started"
        );
        Ok(Session::new(
            state,
            router_cmd_tx,
            router_handle,
            source,
            bridges,
            controls,
        ))
    }
}

/// Main entry point for stream-media pipelines.
///
/// Use [`MediaPipeline::builder()`] to start assembling one.
pub struct MediaPipeline;

impl MediaPipeline {
    /// Creates a new builder.
    pub fn builder() -> MediaPipelineBuilder {
        MediaPipelineBuilder::new()
    }
}
