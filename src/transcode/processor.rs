//! A processor that negotiates a transform chain per input track.

use std::fmt;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, ReentrantMutex};

use crate::codec::CodecRegistry;
use crate::error::MediaError;
use crate::event::{emit, EventCallback, MediaEvent};
use crate::format::MediaFormat;
use crate::source::DataSource;
use crate::stream::{
    PushDataSourceAdapter, PushStream, StreamEndpoint, TransformingPushStream,
    DEFAULT_PENDING_CAPACITY,
};

/// Lifecycle states of a [`Processor`], in the order they are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProcessorState {
    /// Nothing is known about the input.
    Unrealized,
    /// The input tracks are being inspected.
    Configuring,
    /// Track controls are available and formats may be chosen.
    Configured,
    /// Transform chains are being built.
    Realizing,
    /// The output source exists and can be connected.
    Realized,
    /// The input is running and frames may already be flowing.
    Prefetched,
    /// Fully started.
    Started,
}

impl fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unrealized => "Unrealized",
            Self::Configuring => "Configuring",
            Self::Configured => "Configured",
            Self::Realizing => "Realizing",
            Self::Realized => "Realized",
            Self::Prefetched => "Prefetched",
            Self::Started => "Started",
        };
        f.write_str(name)
    }
}

/// Format selection for one input track.
///
/// Supported formats are the track's own format followed by everything the
/// processor's registry can turn it into. The selection is read when the
/// processor realizes; later changes have no effect.
pub struct TrackControl {
    endpoint: StreamEndpoint,
    native: Option<MediaFormat>,
    supported: Vec<MediaFormat>,
    selected: Mutex<Option<MediaFormat>>,
}

impl TrackControl {
    fn new(endpoint: StreamEndpoint, registry: &CodecRegistry) -> Self {
        let native = endpoint.format();
        let supported = native
            .as_ref()
            .map(|f| registry.supported_formats(f))
            .unwrap_or_default();
        Self {
            endpoint,
            native,
            supported,
            selected: Mutex::new(None),
        }
    }

    /// The selected output format, or the track's own format if none was
    /// selected.
    pub fn format(&self) -> Option<MediaFormat> {
        self.selected.lock().clone().or_else(|| self.native.clone())
    }

    /// The format the input stream delivers.
    pub fn native_format(&self) -> Option<&MediaFormat> {
        self.native.as_ref()
    }

    /// Formats this track can be converted to.
    pub fn supported_formats(&self) -> &[MediaFormat] {
        &self.supported
    }

    /// Selects the output format.
    ///
    /// The first supported format compatible with `format` is completed
    /// with its fields and becomes the selection. Returns the selection, or
    /// `None` (keeping the previous one) if no supported format matches.
    pub fn set_format(&self, format: &MediaFormat) -> Option<MediaFormat> {
        let chosen = self.supported.iter().find_map(|s| s.intersects(format))?;
        *self.selected.lock() = Some(chosen.clone());
        Some(chosen)
    }
}

impl fmt::Debug for TrackControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackControl")
            .field("native", &self.native)
            .field("selected", &*self.selected.lock())
            .finish_non_exhaustive()
    }
}

/// The realized output of a [`Processor`]: one transformed push stream per
/// input track.
///
/// Streams are only offered while connected, and deliver frames only while
/// started. The input itself is run by the processor; frames it produces
/// while the output is stopped are dropped.
pub struct ProcessorOutput {
    streams: Vec<Arc<TransformingPushStream>>,
    connected: Mutex<bool>,
    started: Mutex<bool>,
}

impl ProcessorOutput {
    /// The transformed streams, connected or not.
    pub fn transforming_streams(&self) -> &[Arc<TransformingPushStream>] {
        &self.streams
    }

    /// Returns `true` between `start` and `stop`.
    pub fn is_started(&self) -> bool {
        *self.started.lock()
    }

    fn set_started(&self, started: bool) {
        *self.started.lock() = started;
        for stream in &self.streams {
            stream.set_active(started);
        }
    }

    fn close(&self) {
        *self.connected.lock() = false;
        self.set_started(false);
        for stream in &self.streams {
            stream.close();
        }
    }
}

impl DataSource for ProcessorOutput {
    fn connect(&self) -> Result<(), MediaError> {
        *self.connected.lock() = true;
        Ok(())
    }

    fn disconnect(&self) {
        self.set_started(false);
        *self.connected.lock() = false;
    }

    fn start(&self) -> Result<(), MediaError> {
        if !*self.connected.lock() {
            return Err(MediaError::NotConnected);
        }
        self.set_started(true);
        Ok(())
    }

    fn stop(&self) -> Result<(), MediaError> {
        self.set_started(false);
        Ok(())
    }

    fn streams(&self) -> Vec<StreamEndpoint> {
        if !*self.connected.lock() {
            return Vec::new();
        }
        self.streams
            .iter()
            .map(|s| StreamEndpoint::Push(s.clone() as Arc<dyn PushStream>))
            .collect()
    }
}

struct ProcessorInner {
    state: ProcessorState,
    /// The last state reported to listeners. Waiters follow this one.
    announced: ProcessorState,
    /// Why the last configure or realize failed.
    failure: Option<String>,
    tracks: Vec<Arc<TrackControl>>,
    output: Option<Arc<ProcessorOutput>>,
    /// Bumped by `close`. Workers only publish results for the generation
    /// they were spawned in.
    generation: u64,
}

/// Drives an input [`DataSource`] through format negotiation.
///
/// `configure` and `realize` do their work on a worker thread and return at
/// once; callers block on [`wait_for_state`](Self::wait_for_state). Pull
/// streams of the input are adapted to push streams, so every output stream
/// converts frames on the thread that produced them.
///
/// The processor takes over the input: [`close`](Self::close) disconnects
/// it.
pub struct Processor {
    source: Arc<PushDataSourceAdapter>,
    registry: CodecRegistry,
    inner: Mutex<ProcessorInner>,
    changed: Condvar,
    /// Held from a state change until its event has been emitted.
    transitions: ReentrantMutex<()>,
    events: Option<EventCallback>,
    this: Weak<Processor>,
}

impl Processor {
    /// Creates an unrealized processor over a connected `input`.
    pub fn new(input: Arc<dyn DataSource>, registry: CodecRegistry) -> Arc<Self> {
        Self::with_options(input, registry, false, None)
    }

    /// Like [`new`](Self::new). `strict_stop` is passed to the pull stream
    /// adapters; state changes and stream failures are reported to `events`.
    pub fn with_options(
        input: Arc<dyn DataSource>,
        registry: CodecRegistry,
        strict_stop: bool,
        events: Option<EventCallback>,
    ) -> Arc<Self> {
        let source = Arc::new(PushDataSourceAdapter::with_options(
            input,
            strict_stop,
            events.clone(),
        ));
        Arc::new_cyclic(|this| Self {
            source,
            registry,
            inner: Mutex::new(ProcessorInner {
                state: ProcessorState::Unrealized,
                announced: ProcessorState::Unrealized,
                failure: None,
                tracks: Vec::new(),
                output: None,
                generation: 0,
            }),
            changed: Condvar::new(),
            transitions: ReentrantMutex::new(()),
            events,
            this: this.clone(),
        })
    }

    /// The current state.
    pub fn state(&self) -> ProcessorState {
        self.inner.lock().state
    }

    /// One control per input track. Empty before `Configured`.
    pub fn track_controls(&self) -> Vec<Arc<TrackControl>> {
        self.inner.lock().tracks.clone()
    }

    /// The output source. Present from `Realized` on.
    pub fn output(&self) -> Option<Arc<ProcessorOutput>> {
        self.inner.lock().output.clone()
    }

    /// Starts inspecting the input tracks. Does nothing unless unrealized.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be spawned.
    pub fn configure(&self) -> Result<(), MediaError> {
        let mut generation = 0;
        let changed = self.transition(|inner| {
            if inner.state != ProcessorState::Unrealized {
                return None;
            }
            inner.failure = None;
            generation = inner.generation;
            Some(ProcessorState::Configuring)
        });
        if changed.is_none() {
            return Ok(());
        }
        self.spawn_worker(
            "processor-configure",
            generation,
            ProcessorState::Unrealized,
            Self::run_configure,
        )
    }

    /// Starts building the transform chains for the selected formats.
    ///
    /// # Errors
    ///
    /// Returns an error if the processor has not been configured, or if the
    /// worker thread cannot be spawned.
    pub fn realize(&self) -> Result<(), MediaError> {
        let mut generation = 0;
        let mut refused = None;
        let changed = self.transition(|inner| match inner.state {
            ProcessorState::Configured => {
                inner.failure = None;
                generation = inner.generation;
                Some(ProcessorState::Realizing)
            }
            ProcessorState::Realizing
            | ProcessorState::Realized
            | ProcessorState::Prefetched
            | ProcessorState::Started => None,
            other => {
                refused = Some(other);
                None
            }
        });
        if let Some(other) = refused {
            return Err(MediaError::unavailable(
                "processor",
                format!("cannot realize while {other}"),
            ));
        }
        if changed.is_none() {
            return Ok(());
        }
        self.spawn_worker(
            "processor-realize",
            generation,
            ProcessorState::Configured,
            Self::run_realize,
        )
    }

    /// Blocks until the processor has reached `state` or a later one and
    /// the change has been reported to the event callback.
    ///
    /// # Errors
    ///
    /// Returns [`MediaError::StateTimeout`] if `timeout` expires first, or
    /// [`MediaError::ResourceUnavailable`] if the transition failed.
    pub fn wait_for_state(
        &self,
        state: ProcessorState,
        timeout: Duration,
    ) -> Result<(), MediaError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if inner.announced >= state {
                return Ok(());
            }
            if let Some(reason) = &inner.failure {
                return Err(MediaError::unavailable("processor", reason.clone()));
            }
            if self.changed.wait_until(&mut inner, deadline).timed_out() {
                if inner.announced >= state {
                    return Ok(());
                }
                return Err(MediaError::StateTimeout {
                    state: state.to_string(),
                    waited: timeout,
                });
            }
        }
    }

    /// Starts the input and every pull stream adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if the processor is not realized or the input fails
    /// to start.
    pub fn start(&self) -> Result<(), MediaError> {
        let generation = {
            let inner = self.inner.lock();
            match inner.state {
                ProcessorState::Realized | ProcessorState::Prefetched => inner.generation,
                ProcessorState::Started => return Ok(()),
                other => {
                    return Err(MediaError::unavailable(
                        "processor",
                        format!("cannot start while {other}"),
                    ))
                }
            }
        };
        self.source.start()?;
        self.publish(generation, ProcessorState::Prefetched, |_| {});
        self.publish(generation, ProcessorState::Started, |_| {});
        Ok(())
    }

    /// Stops the input. The processor stays realized.
    ///
    /// # Errors
    ///
    /// Returns the input's stop error.
    pub fn stop(&self) -> Result<(), MediaError> {
        let generation = {
            let inner = self.inner.lock();
            if inner.state != ProcessorState::Started {
                return Ok(());
            }
            inner.generation
        };
        let result = self.source.stop();
        self.publish(generation, ProcessorState::Prefetched, |_| {});
        result
    }

    /// Releases the output, the adapters and the input. The processor
    /// returns to `Unrealized`.
    pub fn close(&self) {
        let _transitions = self.transitions.lock();
        let output = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.tracks.clear();
            inner.failure = None;
            inner.output.take()
        };
        if let Some(output) = output {
            output.close();
        }
        self.source.disconnect();
        self.transition(|_| Some(ProcessorState::Unrealized));
        tracing::debug!("processor closed");
    }

    fn spawn_worker(
        &self,
        name: &str,
        generation: u64,
        fallback: ProcessorState,
        work: fn(&Processor, u64),
    ) -> Result<(), MediaError> {
        let weak = self.this.clone();
        let spawned = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                if let Some(processor) = weak.upgrade() {
                    work(&processor, generation);
                }
            });
        match spawned {
            Ok(_) => Ok(()),
            Err(e) => {
                let reason = format!("failed to spawn thread: {e}");
                self.fail(generation, fallback, reason.clone());
                Err(MediaError::unavailable(name, reason))
            }
        }
    }

    fn run_configure(&self, generation: u64) {
        let tracks: Vec<Arc<TrackControl>> = self
            .source
            .streams()
            .into_iter()
            .map(|endpoint| Arc::new(TrackControl::new(endpoint, &self.registry)))
            .collect();
        if tracks.is_empty() {
            let reason = "input offers no streams".to_string();
            self.fail(generation, ProcessorState::Unrealized, reason);
            return;
        }
        tracing::debug!(tracks = tracks.len(), "processor configured");
        self.publish(generation, ProcessorState::Configured, |inner| {
            inner.tracks = tracks;
        });
    }

    fn run_realize(&self, generation: u64) {
        let tracks = self.track_controls();
        match self.build_output(&tracks) {
            Ok(output) => {
                let output = Arc::new(output);
                let published = output.clone();
                let current = self.publish(generation, ProcessorState::Realized, move |inner| {
                    inner.output = Some(published);
                });
                if !current {
                    output.close();
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "processor failed to realize");
                self.fail(generation, ProcessorState::Configured, e.to_string());
            }
        }
    }

    fn build_output(&self, tracks: &[Arc<TrackControl>]) -> Result<ProcessorOutput, MediaError> {
        let mut streams: Vec<Arc<TransformingPushStream>> = Vec::with_capacity(tracks.len());
        for track in tracks {
            let StreamEndpoint::Push(input) = track.endpoint.clone() else {
                continue;
            };
            let chain = match (track.native_format(), track.format()) {
                (Some(from), Some(to)) => match self.registry.find_chain(from, &to) {
                    Some(chain) => chain,
                    None => {
                        for built in &streams {
                            built.close();
                        }
                        return Err(MediaError::unsupported_format(to));
                    }
                },
                _ => Vec::new(),
            };
            let transformed = TransformingPushStream::with_options(
                input,
                chain,
                DEFAULT_PENDING_CAPACITY,
                self.events.clone(),
            );
            match transformed {
                Ok(stream) => streams.push(stream),
                Err(e) => {
                    for built in &streams {
                        built.close();
                    }
                    return Err(e);
                }
            }
        }
        for stream in &streams {
            stream.set_active(false);
        }
        Ok(ProcessorOutput {
            streams,
            connected: Mutex::new(false),
            started: Mutex::new(false),
        })
    }

    /// Applies `update` and, if it yields a state, moves there and reports
    /// it. Transitions are serialized with their events, so listeners see
    /// states in the order they were reached and waiters only wake once the
    /// event is out.
    fn transition<F>(&self, update: F) -> Option<ProcessorState>
    where
        F: FnOnce(&mut ProcessorInner) -> Option<ProcessorState>,
    {
        let _transitions = self.transitions.lock();
        let state = {
            let mut inner = self.inner.lock();
            let state = update(&mut inner)?;
            inner.state = state;
            state
        };
        self.announce(state);
        self.inner.lock().announced = state;
        self.changed.notify_all();
        Some(state)
    }

    /// Moves to `state` if `generation` is still current. Returns `false`
    /// when the processor was closed in the meantime.
    fn publish<F>(&self, generation: u64, state: ProcessorState, update: F) -> bool
    where
        F: FnOnce(&mut ProcessorInner),
    {
        self.transition(|inner| {
            if inner.generation != generation {
                return None;
            }
            update(inner);
            Some(state)
        })
        .is_some()
    }

    fn fail(&self, generation: u64, fallback: ProcessorState, reason: String) {
        self.transition(|inner| {
            if inner.generation != generation {
                return None;
            }
            inner.failure = Some(reason);
            Some(fallback)
        });
    }

    fn announce(&self, state: ProcessorState) {
        tracing::debug!(state = %state, "processor state changed");
        emit(
            self.events.as_ref(),
            MediaEvent::ProcessorStateChanged {
                state: state.to_string(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::event_callback;
    use crate::format::AudioFormat;
    use crate::frame::Frame;
    use crate::source::{MockDataSource, MockPullStream, MockPushStream};
    use crate::stream::transfer_handler;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WAIT: Duration = Duration::from_secs(2);

    fn linear(rate: f64) -> AudioFormat {
        AudioFormat::linear(rate, 16, 1)
    }

    fn connected(streams: Vec<StreamEndpoint>) -> Arc<MockDataSource> {
        let source = Arc::new(MockDataSource::new(streams));
        source.connect().unwrap();
        source
    }

    #[test]
    fn test_states_are_ordered() {
        assert!(ProcessorState::Unrealized < ProcessorState::Configured);
        assert!(ProcessorState::Realized < ProcessorState::Started);
        assert_eq!(ProcessorState::Prefetched.to_string(), "Prefetched");
    }

    #[test]
    fn test_wait_times_out() {
        let processor = Processor::new(connected(Vec::new()), CodecRegistry::with_defaults());
        let err = processor
            .wait_for_state(ProcessorState::Configured, Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, MediaError::StateTimeout { .. }));
    }

    #[test]
    fn test_configure_without_streams_fails() {
        let processor = Processor::new(connected(Vec::new()), CodecRegistry::with_defaults());
        processor.configure().unwrap();
        let err = processor.wait_for_state(ProcessorState::Configured, WAIT).unwrap_err();
        assert!(matches!(err, MediaError::ResourceUnavailable { .. }));
        assert_eq!(processor.state(), ProcessorState::Unrealized);
    }

    #[test]
    fn test_realize_requires_configure() {
        let processor = Processor::new(connected(Vec::new()), CodecRegistry::with_defaults());
        assert!(processor.realize().is_err());
    }

    #[test]
    fn test_track_format_selection() {
        let upstream = Arc::new(MockPushStream::new(linear(32000.0)));
        let source = connected(vec![StreamEndpoint::Push(upstream)]);
        let processor = Processor::new(source, CodecRegistry::with_defaults());
        processor.configure().unwrap();
        processor.wait_for_state(ProcessorState::Configured, WAIT).unwrap();

        let tracks = processor.track_controls();
        assert_eq!(tracks.len(), 1);
        let track = &tracks[0];
        assert_eq!(track.supported_formats()[0], linear(32000.0).into());
        let chosen = track.set_format(&linear(16000.0).into()).unwrap();
        assert!(chosen.matches(&linear(16000.0).into()));
        assert_eq!(track.format(), Some(chosen));
        assert!(track.set_format(&AudioFormat::new("opus").into()).is_none());
    }

    #[test]
    fn test_realized_output_converts_push_frames() {
        let upstream = Arc::new(MockPushStream::new(linear(32000.0)));
        let source = connected(vec![StreamEndpoint::Push(upstream.clone())]);
        let states = Arc::new(Mutex::new(Vec::new()));
        let seen = states.clone();
        let events = event_callback(move |event| {
            if let MediaEvent::ProcessorStateChanged { state } = event {
                seen.lock().push(state);
            }
        });
        let registry = CodecRegistry::with_defaults();
        let processor = Processor::with_options(source.clone(), registry, false, Some(events));
        processor.configure().unwrap();
        processor.wait_for_state(ProcessorState::Configured, WAIT).unwrap();
        processor.track_controls()[0].set_format(&linear(16000.0).into()).unwrap();
        processor.realize().unwrap();
        processor.wait_for_state(ProcessorState::Realized, WAIT).unwrap();

        let output = processor.output().unwrap();
        assert!(output.streams().is_empty());
        output.connect().unwrap();
        let streams = output.streams();
        assert_eq!(streams.len(), 1);
        let StreamEndpoint::Push(stream) = &streams[0] else {
            panic!("processor output is push");
        };
        assert!(stream.format().unwrap().matches(&linear(16000.0).into()));

        let notified = Arc::new(AtomicUsize::new(0));
        let n = notified.clone();
        stream.set_transfer_handler(Some(transfer_handler(move |_| {
            n.fetch_add(1, Ordering::SeqCst);
        })));
        processor.start().unwrap();
        assert!(source.is_started());
        upstream.push_frame(Frame::from_bytes(vec![0; 640], linear(32000.0)));
        assert_eq!(notified.load(Ordering::SeqCst), 0);

        output.start().unwrap();
        upstream.push_frame(Frame::from_bytes(vec![0; 640], linear(32000.0)));
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        let mut frame = Frame::new();
        stream.read(&mut frame).unwrap();
        assert_eq!(frame.length, 320);

        processor.close();
        assert!(!source.is_connected());
        assert!(output.streams().is_empty());
        let states = states.lock().clone();
        assert_eq!(
            states,
            vec![
                "Configuring",
                "Configured",
                "Realizing",
                "Realized",
                "Prefetched",
                "Started",
                "Unrealized",
            ]
        );
    }

    #[test]
    fn test_pull_tracks_are_adapted() {
        let pull = Arc::new(MockPullStream::new(linear(16000.0)));
        let source = connected(vec![StreamEndpoint::Pull(pull.clone())]);
        let processor = Processor::new(source, CodecRegistry::with_defaults());
        processor.configure().unwrap();
        processor.wait_for_state(ProcessorState::Configured, WAIT).unwrap();
        processor.realize().unwrap();
        processor.wait_for_state(ProcessorState::Realized, WAIT).unwrap();

        let output = processor.output().unwrap();
        output.connect().unwrap();
        let StreamEndpoint::Push(stream) = &output.streams()[0] else {
            panic!("processor output is push");
        };
        let (tx, rx) = std::sync::mpsc::channel();
        stream.set_transfer_handler(Some(transfer_handler(move |s| {
            let mut frame = Frame::new();
            if s.read(&mut frame).is_ok() && frame.length > 0 {
                let _ = tx.send(frame.length);
            }
        })));
        output.start().unwrap();
        processor.start().unwrap();
        pull.push_frame(Frame::from_bytes(vec![5; 320], linear(16000.0)));
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), 320);
        processor.close();
    }
}
