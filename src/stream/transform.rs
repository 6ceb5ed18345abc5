//! A push stream that runs every frame through a transform chain.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{transfer_handler, Control, PushStream, TransferHandler};
use crate::codec::{run_chain, Transform};
use crate::error::MediaError;
use crate::event::{emit, EventCallback, MediaEvent};
use crate::format::MediaFormat;
use crate::frame::Frame;

/// Default bound on converted frames waiting to be read.
pub const DEFAULT_PENDING_CAPACITY: usize = 64;

struct TransformState {
    chain: Vec<Box<dyn Transform>>,
    pending: VecDeque<Frame>,
    read_error: Option<MediaError>,
    handler: Option<TransferHandler>,
    generation: u64,
    /// While unset, upstream frames are read and dropped unconverted.
    active: bool,
}

/// Wraps a [`PushStream`] and converts its frames with a chain of
/// [`Transform`]s.
///
/// Conversion happens on the producer's thread when the wrapped stream
/// notifies. One input can yield several outputs (silence insertion does);
/// each is queued and announced separately. When more than the configured
/// number of outputs wait unread, the oldest is dropped.
pub struct TransformingPushStream {
    stream: Arc<dyn PushStream>,
    state: Mutex<TransformState>,
    capacity: usize,
    events: Option<EventCallback>,
    this: Weak<TransformingPushStream>,
}

impl TransformingPushStream {
    /// Wraps `stream` and opens every transform of `chain`.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while opening a transform. Transforms
    /// opened before it are closed again.
    pub fn new(
        stream: Arc<dyn PushStream>,
        chain: Vec<Box<dyn Transform>>,
    ) -> Result<Arc<Self>, MediaError> {
        Self::with_options(stream, chain, DEFAULT_PENDING_CAPACITY, None)
    }

    /// Like [`new`](Self::new) with an explicit pending bound and an event
    /// callback, which is also handed to every transform.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while opening a transform.
    pub fn with_options(
        stream: Arc<dyn PushStream>,
        mut chain: Vec<Box<dyn Transform>>,
        capacity: usize,
        events: Option<EventCallback>,
    ) -> Result<Arc<Self>, MediaError> {
        for i in 0..chain.len() {
            chain[i].set_event_callback(events.clone());
            if let Err(e) = chain[i].open() {
                for opened in &mut chain[..i] {
                    opened.close();
                }
                return Err(e);
            }
        }
        let names: Vec<&str> = chain.iter().map(|t| t.name()).collect();
        tracing::debug!(chain = ?names, "transform chain opened");

        Ok(Arc::new_cyclic(|this| Self {
            stream,
            state: Mutex::new(TransformState {
                chain,
                pending: VecDeque::new(),
                read_error: None,
                handler: None,
                generation: 0,
                active: true,
            }),
            capacity: capacity.max(1),
            events,
            this: this.clone(),
        }))
    }

    /// Number of converted frames waiting to be read.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Names of the transforms in the chain.
    pub fn chain_names(&self) -> Vec<String> {
        self.state
            .lock()
            .chain
            .iter()
            .map(|t| t.name().to_string())
            .collect()
    }

    /// Returns `true` while upstream frames are converted and announced.
    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Turns delivery on or off. An inactive stream keeps draining the
    /// wrapped stream but drops what it reads and notifies no one. Frames
    /// already pending stay readable.
    pub fn set_active(&self, active: bool) {
        self.state.lock().active = active;
    }

    /// Closes every transform and detaches from the wrapped stream.
    pub fn close(&self) {
        self.stream.set_transfer_handler(None);
        let mut state = self.state.lock();
        state.generation += 1;
        state.handler = None;
        state.pending.clear();
        for transform in &mut state.chain {
            transform.close();
        }
    }

    fn on_upstream_data(&self, generation: u64) {
        let mut input = Frame::new();
        let read = self.stream.read(&mut input);

        let (handler, announced) = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            if !state.active {
                tracing::trace!("inactive transformed stream, frame dropped");
                return;
            }
            match read {
                Err(e) => {
                    tracing::warn!(error = %e, "read from transformed stream failed");
                    emit(
                        self.events.as_ref(),
                        MediaEvent::ReadFailed {
                            stream: "transform".into(),
                            error: e.to_string(),
                        },
                    );
                    state.read_error = Some(e);
                    (state.handler.clone(), 1)
                }
                Ok(()) if input.length == 0 && !input.is_eom() => return,
                Ok(()) if input.is_discard() => return,
                Ok(()) => {
                    let outputs = run_chain(&mut state.chain, input);
                    let count = outputs.len();
                    for out in outputs {
                        if state.pending.len() >= self.capacity {
                            state.pending.pop_front();
                            emit(
                                self.events.as_ref(),
                                MediaEvent::CacheFull {
                                    entries: self.capacity,
                                },
                            );
                        }
                        state.pending.push_back(out);
                    }
                    tracing::trace!(
                        outputs = count,
                        pending = state.pending.len(),
                        "frame transformed"
                    );
                    (state.handler.clone(), count)
                }
            }
        };

        if let Some(handler) = handler {
            for _ in 0..announced {
                handler(self);
            }
        }
    }
}

impl PushStream for TransformingPushStream {
    fn format(&self) -> Option<MediaFormat> {
        let state = self.state.lock();
        match state.chain.last() {
            Some(last) => last.output_format().cloned(),
            None => self.stream.format(),
        }
    }

    fn read(&self, frame: &mut Frame) -> Result<(), MediaError> {
        let mut state = self.state.lock();
        if let Some(e) = state.read_error.take() {
            return Err(MediaError::read_failed(e));
        }
        match state.pending.pop_front() {
            Some(next) => *frame = next,
            None => frame.length = 0,
        }
        Ok(())
    }

    fn set_transfer_handler(&self, handler: Option<TransferHandler>) {
        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.handler.clone_from(&handler);
            state.generation
        };
        let substitute = handler.map(|_| {
            let weak = self.this.clone();
            transfer_handler(move |_| {
                if let Some(wrapper) = weak.upgrade() {
                    wrapper.on_upstream_data(generation);
                }
            })
        });
        self.stream.set_transfer_handler(substitute);
    }

    fn end_of_stream(&self) -> bool {
        self.stream.end_of_stream() && self.state.lock().pending.is_empty()
    }

    fn controls(&self) -> Vec<Control> {
        self.stream.controls()
    }
}

impl Drop for TransformingPushStream {
    fn drop(&mut self) {
        for transform in &mut self.state.get_mut().chain {
            transform.close();
        }
    }
}
