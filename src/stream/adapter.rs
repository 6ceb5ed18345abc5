//! Adapters between pull and push streams.
//!
//! [`PushStreamAdapter`] runs a dedicated thread that performs the blocking
//! reads of a [`PullStream`] and announces each frame through a transfer
//! handler. [`PullStreamAdapter`] goes the other way and lets a
//! [`PushStream`] be read by polling.

use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::{transfer_handler, Control, PullStream, PushStream, StreamEndpoint, TransferHandler};
use crate::error::MediaError;
use crate::event::{emit, EventCallback, MediaEvent};
use crate::format::MediaFormat;
use crate::frame::Frame;
use crate::source::DataSource;

/// Frame most recently read by the driving thread.
struct Slot {
    frame: Frame,
    written: bool,
    error: Option<MediaError>,
}

struct Driver {
    started: bool,
    /// Bumped on every start and stop. A thread only acts while the
    /// generation it was spawned with is current.
    generation: u64,
    /// Generation of the thread that is still alive, if any.
    running: Option<u64>,
    thread_id: Option<ThreadId>,
}

/// Presents a [`PullStream`] as a [`PushStream`].
///
/// While started, a thread named `pull-adapter` loops on the pull stream's
/// blocking `read`. Each frame that is not flagged discard is parked in a
/// single slot and the transfer handler is notified; a consumer `read` takes
/// it out. A read failure is kept and returned (once) by the consumer's next
/// `read`.
///
/// The blocking pull happens without holding any lock, so consumer reads and
/// `stop` never wait on the producer.
pub struct PushStreamAdapter {
    stream: Arc<dyn PullStream>,
    slot: Mutex<Slot>,
    driver: Mutex<Driver>,
    driver_exited: Condvar,
    handler: Mutex<Option<TransferHandler>>,
    strict_stop: bool,
    events: Option<EventCallback>,
    this: Weak<PushStreamAdapter>,
}

impl PushStreamAdapter {
    /// Wraps `stream`. The adapter is created stopped.
    pub fn new(stream: Arc<dyn PullStream>) -> Arc<Self> {
        Self::with_options(stream, false, None)
    }

    /// Wraps `stream`.
    ///
    /// With `strict_stop` set, [`stop`](Self::stop) waits until the driving
    /// thread has exited. Read failures are reported to `events`.
    pub fn with_options(
        stream: Arc<dyn PullStream>,
        strict_stop: bool,
        events: Option<EventCallback>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            stream,
            slot: Mutex::new(Slot {
                frame: Frame::new(),
                written: false,
                error: None,
            }),
            driver: Mutex::new(Driver {
                started: false,
                generation: 0,
                running: None,
                thread_id: None,
            }),
            driver_exited: Condvar::new(),
            handler: Mutex::new(None),
            strict_stop,
            events,
            this: this.clone(),
        })
    }

    /// The wrapped pull stream.
    pub fn pull_stream(&self) -> &Arc<dyn PullStream> {
        &self.stream
    }

    /// Returns `true` between `start` and `stop`.
    pub fn is_started(&self) -> bool {
        self.driver.lock().started
    }

    fn is_current(&self, generation: u64) -> bool {
        let driver = self.driver.lock();
        driver.started && driver.generation == generation
    }

    /// Starts the driving thread. Starting twice is a no-op.
    pub fn start(&self) -> Result<(), MediaError> {
        let mut driver = self.driver.lock();
        if driver.started {
            return Ok(());
        }
        driver.started = true;
        driver.generation += 1;
        let generation = driver.generation;

        let weak = self.this.clone();
        let handle = thread::Builder::new()
            .name("pull-adapter".to_string())
            .spawn(move || run_driver(&weak, generation))
            .map_err(|e| {
                MediaError::unavailable("pull-adapter", format!("failed to spawn thread: {e}"))
            });
        match handle {
            Ok(handle) => {
                driver.running = Some(generation);
                driver.thread_id = Some(handle.thread().id());
                tracing::info!(generation, "pull adapter started");
                Ok(())
            }
            Err(e) => {
                driver.started = false;
                Err(e)
            }
        }
    }

    /// Stops the driving thread.
    ///
    /// The thread is released immediately; it exits when its blocking read
    /// returns and anything it read by then is dropped. With strict stop the
    /// call waits for that exit, unless made from the driving thread itself.
    pub fn stop(&self) {
        let mut driver = self.driver.lock();
        if !driver.started {
            return;
        }
        driver.started = false;
        driver.generation += 1;
        {
            // nothing published before the stop is handed out after it
            let mut slot = self.slot.lock();
            slot.written = false;
            slot.error = None;
        }
        tracing::info!(generation = driver.generation, "pull adapter stopped");

        if self.strict_stop && driver.thread_id != Some(thread::current().id()) {
            while driver.running.is_some() {
                self.driver_exited.wait(&mut driver);
            }
        }
    }

    /// Publishes the result of one pull read. Returns whether the handler
    /// should be notified, or `None` when the read came from a thread that
    /// is no longer current.
    fn publish(
        &self,
        generation: u64,
        frame: &mut Frame,
        result: Result<(), MediaError>,
    ) -> Option<bool> {
        let driver = self.driver.lock();
        if !driver.started || driver.generation != generation {
            return None;
        }
        let mut slot = self.slot.lock();
        match result {
            Ok(()) if frame.is_discard() => return Some(false),
            Ok(()) => {
                std::mem::swap(&mut slot.frame, frame);
                slot.written = true;
            }
            Err(e) => {
                tracing::warn!(error = %e, "pull stream read failed");
                emit(
                    self.events.as_ref(),
                    MediaEvent::ReadFailed {
                        stream: "pull-adapter".to_string(),
                        error: e.to_string(),
                    },
                );
                slot.error = Some(e);
            }
        }
        Some(true)
    }

    /// The handler to notify for `generation`, checked again right before
    /// the call. `None` when the thread was stopped after publishing.
    fn current_handler(&self, generation: u64) -> Option<Option<TransferHandler>> {
        let driver = self.driver.lock();
        if !driver.started || driver.generation != generation {
            return None;
        }
        Some(self.handler.lock().clone())
    }

    fn driver_exit(&self, generation: u64) {
        let mut driver = self.driver.lock();
        if driver.running == Some(generation) {
            driver.running = None;
            driver.thread_id = None;
            self.driver_exited.notify_all();
        }
    }
}

fn run_driver(this: &Weak<PushStreamAdapter>, generation: u64) {
    let mut frame = Frame::new();
    loop {
        let Some(adapter) = this.upgrade() else {
            return;
        };
        if !adapter.is_current(generation) {
            adapter.driver_exit(generation);
            return;
        }

        let result = adapter.stream.read(&mut frame);
        let failed = result.is_err();
        let eom = !failed && frame.is_eom();
        let Some(notify) = adapter.publish(generation, &mut frame, result) else {
            tracing::debug!(generation, "dropping read from stopped pull adapter");
            adapter.driver_exit(generation);
            return;
        };
        if notify {
            let Some(handler) = adapter.current_handler(generation) else {
                tracing::debug!(generation, "pull adapter stopped before notifying");
                adapter.driver_exit(generation);
                return;
            };
            if let Some(handler) = handler {
                handler(adapter.as_ref());
            }
        }

        if eom {
            tracing::info!(generation, "pull stream reached end of media");
            adapter.driver_exit(generation);
            return;
        }
        if failed {
            thread::yield_now();
        }
        frame = Frame::new();
    }
}

impl PushStream for PushStreamAdapter {
    fn format(&self) -> Option<MediaFormat> {
        self.stream.format()
    }

    fn read(&self, frame: &mut Frame) -> Result<(), MediaError> {
        let mut slot = self.slot.lock();
        if let Some(e) = slot.error.take() {
            return Err(MediaError::read_failed(e));
        }
        if slot.written {
            std::mem::swap(&mut slot.frame, frame);
            slot.written = false;
        } else {
            frame.length = 0;
        }
        Ok(())
    }

    fn set_transfer_handler(&self, handler: Option<TransferHandler>) {
        *self.handler.lock() = handler;
    }

    fn end_of_stream(&self) -> bool {
        self.stream.end_of_stream()
    }

    fn controls(&self) -> Vec<Control> {
        self.stream.controls()
    }
}

impl Drop for PushStreamAdapter {
    fn drop(&mut self) {
        let driver = self.driver.get_mut();
        driver.started = false;
        driver.generation += 1;
    }
}

/// How long [`PullStreamAdapter::read`] waits for a notification.
pub const DEFAULT_PULL_WAIT: Duration = Duration::from_millis(20);

/// Presents a [`PushStream`] as a [`PullStream`].
///
/// The push stream keeps driving itself; `read` waits a bounded time for its
/// next notification and then reads whatever it has.
pub struct PullStreamAdapter {
    stream: Arc<dyn PushStream>,
    available: Mutex<bool>,
    data_ready: Condvar,
    wait: Duration,
}

impl PullStreamAdapter {
    /// Wraps `stream` and takes over its transfer handler.
    pub fn new(stream: Arc<dyn PushStream>) -> Arc<Self> {
        Self::with_wait(stream, DEFAULT_PULL_WAIT)
    }

    /// Wraps `stream`, waiting up to `wait` per read for a notification.
    pub fn with_wait(stream: Arc<dyn PushStream>, wait: Duration) -> Arc<Self> {
        let adapter = Arc::new(Self {
            stream,
            available: Mutex::new(false),
            data_ready: Condvar::new(),
            wait,
        });
        let weak = Arc::downgrade(&adapter);
        adapter
            .stream
            .set_transfer_handler(Some(transfer_handler(move |_| {
                if let Some(a) = weak.upgrade() {
                    *a.available.lock() = true;
                    a.data_ready.notify_one();
                }
            })));
        adapter
    }

    /// Releases the wrapped stream's transfer handler.
    pub fn disconnect(&self) {
        self.stream.set_transfer_handler(None);
    }
}

impl PullStream for PullStreamAdapter {
    fn format(&self) -> Option<MediaFormat> {
        self.stream.format()
    }

    fn read(&self, frame: &mut Frame) -> Result<(), MediaError> {
        {
            let mut available = self.available.lock();
            if !*available {
                self.data_ready.wait_for(&mut available, self.wait);
            }
            *available = false;
        }
        self.stream.read(frame)
    }

    fn end_of_stream(&self) -> bool {
        self.stream.end_of_stream()
    }

    fn will_read_block(&self) -> bool {
        !*self.available.lock()
    }

    fn controls(&self) -> Vec<Control> {
        self.stream.controls()
    }
}

struct AdaptedStream {
    pull: Arc<dyn PullStream>,
    push: Arc<PushStreamAdapter>,
}

/// Presents a data source with pull streams as one with push streams.
///
/// Keeps one [`PushStreamAdapter`] per pull stream, reconciled against the
/// wrapped source on every [`streams`](DataSource::streams) call: new pull
/// streams get an adapter, adapters whose stream disappeared are stopped.
/// Push streams of the wrapped source are passed through.
pub struct PushDataSourceAdapter {
    source: Arc<dyn DataSource>,
    adapters: Mutex<Vec<AdaptedStream>>,
    started: Mutex<bool>,
    strict_stop: bool,
    events: Option<EventCallback>,
}

impl PushDataSourceAdapter {
    /// Wraps `source`.
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self::with_options(source, false, None)
    }

    /// Wraps `source`, passing `strict_stop` and `events` to every adapter.
    pub fn with_options(
        source: Arc<dyn DataSource>,
        strict_stop: bool,
        events: Option<EventCallback>,
    ) -> Self {
        Self {
            source,
            adapters: Mutex::new(Vec::new()),
            started: Mutex::new(false),
            strict_stop,
            events,
        }
    }

    /// Number of active stream adapters.
    pub fn adapter_count(&self) -> usize {
        self.adapters.lock().len()
    }
}

impl DataSource for PushDataSourceAdapter {
    fn connect(&self) -> Result<(), MediaError> {
        self.source.connect()
    }

    fn disconnect(&self) {
        let adapters = std::mem::take(&mut *self.adapters.lock());
        for a in &adapters {
            a.push.stop();
        }
        *self.started.lock() = false;
        self.source.disconnect();
    }

    fn start(&self) -> Result<(), MediaError> {
        self.source.start()?;
        *self.started.lock() = true;
        // streams() may not have been called yet
        let _ = self.streams();
        for a in self.adapters.lock().iter() {
            a.push.start()?;
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), MediaError> {
        *self.started.lock() = false;
        for a in self.adapters.lock().iter() {
            a.push.stop();
        }
        self.source.stop()
    }

    fn streams(&self) -> Vec<StreamEndpoint> {
        let inner = self.source.streams();
        let started = *self.started.lock();
        let mut adapters = self.adapters.lock();

        adapters.retain(|a| {
            let present = inner
                .iter()
                .any(|s| matches!(s, StreamEndpoint::Pull(p) if Arc::ptr_eq(p, &a.pull)));
            if !present {
                tracing::debug!("closing adapter of removed pull stream");
                a.push.stop();
            }
            present
        });

        let mut out = Vec::with_capacity(inner.len());
        for endpoint in inner {
            match endpoint {
                StreamEndpoint::Push(p) => out.push(StreamEndpoint::Push(p)),
                StreamEndpoint::Pull(pull) => {
                    let existing = adapters.iter().find(|a| Arc::ptr_eq(&a.pull, &pull));
                    let push = if let Some(a) = existing {
                        a.push.clone()
                    } else {
                        let push = PushStreamAdapter::with_options(
                            pull.clone(),
                            self.strict_stop,
                            self.events.clone(),
                        );
                        if started {
                            if let Err(e) = push.start() {
                                tracing::warn!(error = %e, "failed to start stream adapter");
                            }
                        }
                        adapters.push(AdaptedStream {
                            pull,
                            push: push.clone(),
                        });
                        push
                    };
                    out.push(StreamEndpoint::Push(push));
                }
            }
        }
        out
    }

    fn content_type(&self) -> &str {
        self.source.content_type()
    }
}
