//! Bounded frame cache between a push stream and its reader.
//!
//! [`CachingPushStream`] reads every frame its wrapped stream announces into
//! a fixed-capacity queue and lets the consumer take several of them in one
//! read. When the queue holds as much media as the target asks for, the
//! notifying producer thread is held back until the consumer makes room.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;

use super::{find_buffer_control, transfer_handler, Control, PushStream, TransferHandler};
use crate::config::{BufferLength, CacheConfig};
use crate::error::MediaError;
use crate::event::{emit, EventCallback, MediaEvent};
use crate::format::MediaFormat;
use crate::frame::{Frame, Payload, TIME_UNKNOWN};

/// Buffering target of a frame cache.
///
/// Shared between the cache and whoever tunes it at runtime.
#[derive(Debug)]
pub struct BufferControl {
    state: Mutex<BufferControlState>,
}

#[derive(Debug)]
struct BufferControlState {
    buffer_length: BufferLength,
    minimum_threshold: BufferLength,
    enabled_threshold: bool,
}

impl BufferControl {
    /// Creates a control with the given target.
    #[must_use]
    pub fn new(buffer_length: BufferLength) -> Self {
        Self {
            state: Mutex::new(BufferControlState {
                buffer_length,
                minimum_threshold: BufferLength::Default,
                enabled_threshold: false,
            }),
        }
    }

    /// Current target.
    pub fn buffer_length(&self) -> BufferLength {
        self.state.lock().buffer_length
    }

    /// Sets the target and returns the one in effect.
    ///
    /// `Millis(0)` is rejected and leaves the target unchanged.
    pub fn set_buffer_length(&self, buffer_length: BufferLength) -> BufferLength {
        let mut state = self.state.lock();
        if buffer_length != BufferLength::Millis(0) {
            state.buffer_length = buffer_length;
        }
        state.buffer_length
    }

    /// Returns whether the minimum threshold is enabled.
    pub fn enabled_threshold(&self) -> bool {
        self.state.lock().enabled_threshold
    }

    /// Enables or disables the minimum threshold.
    pub fn set_enabled_threshold(&self, enabled: bool) {
        self.state.lock().enabled_threshold = enabled;
    }

    /// Current minimum threshold.
    pub fn minimum_threshold(&self) -> BufferLength {
        self.state.lock().minimum_threshold
    }

    /// Accepted for interface compatibility; the cache has no minimum fill
    /// policy, so this returns the current threshold unchanged.
    pub fn set_minimum_threshold(&self, _threshold: BufferLength) -> BufferLength {
        self.state.lock().minimum_threshold
    }
}

struct CacheState {
    entries: HeapRb<Frame>,
    length_ms: u64,
    read_error: Option<MediaError>,
    handler: Option<TransferHandler>,
    /// Bumped whenever the downstream handler changes; notifications from a
    /// substitute registered under an older generation are ignored.
    generation: u64,
}

/// A [`PushStream`] decorator that caches frames of the wrapped stream.
///
/// The producer may add a frame when:
/// 1. the cache is empty, or otherwise
/// 2. it holds fewer than `max_entries` frames, a millisecond target is set,
///    and the cached duration is at least 1ms and below the target.
///
/// A consumer `read` drains entries in FIFO order into the caller's frame.
/// With a byte payload of some capacity, consecutive byte entries are
/// concatenated until it is full; the first entry donates the metadata and
/// the duration becomes unknown. Otherwise the first entry is copied whole.
pub struct CachingPushStream {
    stream: Arc<dyn PushStream>,
    cache: Mutex<CacheState>,
    room: Condvar,
    control: Arc<BufferControl>,
    owns_control: bool,
    config: CacheConfig,
    events: Option<EventCallback>,
    this: Weak<CachingPushStream>,
}

impl CachingPushStream {
    /// Wraps `stream` with the default configuration.
    pub fn new(stream: Arc<dyn PushStream>) -> Arc<Self> {
        Self::with_config(stream, CacheConfig::default(), None)
    }

    /// Wraps `stream`.
    ///
    /// If the wrapped stream already exposes a [`BufferControl`] the cache
    /// follows it; otherwise it creates its own, initialised from
    /// `config.target_buffer_length`.
    pub fn with_config(
        stream: Arc<dyn PushStream>,
        config: CacheConfig,
        events: Option<EventCallback>,
    ) -> Arc<Self> {
        let inherited = find_buffer_control(&stream.controls());
        let owns_control = inherited.is_none();
        let control = inherited
            .unwrap_or_else(|| Arc::new(BufferControl::new(config.target_buffer_length)));
        let capacity = config.max_entries.max(1);

        Arc::new_cyclic(|this| Self {
            stream,
            cache: Mutex::new(CacheState {
                entries: HeapRb::new(capacity),
                length_ms: 0,
                read_error: None,
                handler: None,
                generation: 0,
            }),
            room: Condvar::new(),
            control,
            owns_control,
            config,
            events,
            this: this.clone(),
        })
    }

    /// The control governing this cache's target.
    pub fn buffer_control(&self) -> Arc<BufferControl> {
        self.control.clone()
    }

    /// Number of cached frames.
    pub fn len(&self) -> usize {
        self.cache.lock().entries.occupied_len()
    }

    /// Returns `true` if no frames are cached.
    pub fn is_empty(&self) -> bool {
        self.cache.lock().entries.is_empty()
    }

    /// Duration of media currently cached.
    pub fn buffered_duration(&self) -> Duration {
        Duration::from_millis(self.cache.lock().length_ms)
    }

    /// Detaches from the wrapped stream, drops cached frames and releases a
    /// producer blocked waiting for room.
    pub fn close(&self) {
        self.set_transfer_handler(None);
        let mut cache = self.cache.lock();
        cache.entries.clear();
        cache.length_ms = 0;
    }

    fn can_write(&self, cache: &CacheState) -> bool {
        let len = cache.entries.occupied_len();
        if len == 0 {
            return true;
        }
        if len >= self.config.max_entries {
            return false;
        }
        let Some(target) = self.control.buffer_length().millis() else {
            return false;
        };
        if cache.length_ms < 1 {
            return false;
        }
        cache.length_ms < target
    }

    fn length_in_millis(&self, frame: &Frame) -> u64 {
        if frame.length == 0 {
            return 0;
        }
        frame
            .format
            .clone()
            .or_else(|| self.stream.format())
            .and_then(|f| f.duration_of(frame.byte_len()))
            .map_or(0, |d| d.as_millis() as u64)
    }

    /// Handles a notification from the wrapped stream. Returns the
    /// downstream handler to forward to, or `None` if the notification
    /// belongs to a superseded registration.
    fn on_upstream_data(&self, generation: u64) -> Option<TransferHandler> {
        {
            let mut cache = self.cache.lock();
            let mut reported_full = false;
            loop {
                if cache.generation != generation {
                    return None;
                }
                if self.can_write(&cache) {
                    break;
                }
                let entries = cache.entries.occupied_len();
                if entries >= self.config.max_entries && !reported_full {
                    reported_full = true;
                    tracing::debug!(entries, "frame cache full, holding producer");
                    emit(self.events.as_ref(), MediaEvent::CacheFull { entries });
                }
                self.room.wait_for(&mut cache, self.config.wait_interval);
            }
        }

        let mut frame = Frame::new();
        let result = self.stream.read(&mut frame);

        let mut cache = self.cache.lock();
        if cache.generation != generation {
            return None;
        }
        match result {
            Ok(()) => {
                if !frame.is_discard() && frame.length > 0 && !frame.payload.is_empty() {
                    let ms = self.length_in_millis(&frame);
                    if cache.entries.try_push(frame).is_ok() {
                        cache.length_ms += ms;
                        tracing::trace!(
                            entries = cache.entries.occupied_len(),
                            buffered_ms = cache.length_ms,
                            "frame cached"
                        );
                    } else {
                        let entries = cache.entries.occupied_len();
                        tracing::warn!(entries, "frame cache full, dropping frame");
                        emit(self.events.as_ref(), MediaEvent::CacheFull { entries });
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cached stream read failed");
                emit(
                    self.events.as_ref(),
                    MediaEvent::ReadFailed {
                        stream: "cache".to_string(),
                        error: e.to_string(),
                    },
                );
                cache.read_error = Some(e);
            }
        }
        cache.handler.clone()
    }
}

/// Moves data from the cached entry `head` into `out` starting at
/// `out_offset`. Returns the next output offset if draining may continue
/// with the following entry.
fn drain_entry(head: &mut Frame, out: &mut Frame, out_offset: usize) -> Option<usize> {
    if head.payload.is_empty() {
        out.format.clone_from(&head.format);
        return Some(out_offset);
    }

    let copied = match (&head.payload, &mut out.payload) {
        (Payload::Bytes(src), Payload::Bytes(dst)) => {
            let room = dst.len().saturating_sub(out_offset);
            if room == 0 {
                return None;
            }
            let available = src.len().saturating_sub(head.offset).min(head.length);
            let n = available.min(room);
            dst[out_offset..out_offset + n].copy_from_slice(&src[head.offset..head.offset + n]);
            Some(n)
        }
        _ => None,
    };

    match copied {
        Some(n) => {
            if out.offset == out_offset {
                out.copy_metadata_from(head);
                out.duration = TIME_UNKNOWN;
            }
            out.length += n;
            head.offset += n;
            head.length -= n;
            Some(out_offset + n)
        }
        None => {
            if out.offset == out_offset {
                out.copy_from(head);
                head.offset += out.length;
                head.length = 0;
            }
            None
        }
    }
}

impl PushStream for CachingPushStream {
    fn format(&self) -> Option<MediaFormat> {
        self.stream.format()
    }

    fn read(&self, out: &mut Frame) -> Result<(), MediaError> {
        let mut cache = self.cache.lock();
        if let Some(e) = cache.read_error.take() {
            return Err(MediaError::read_failed(e));
        }

        out.length = 0;
        if cache.entries.is_empty() {
            return Ok(());
        }

        let mut out_offset = out.offset;
        loop {
            let (next, exhausted) = {
                let Some(head) = cache.entries.iter_mut().next() else {
                    break;
                };
                let next = drain_entry(head, out, out_offset);
                (next, head.length == 0)
            };
            if exhausted {
                let _ = cache.entries.try_pop();
            }
            match next {
                Some(offset) => out_offset = offset,
                None => break,
            }
        }

        let drained = self.length_in_millis(out);
        cache.length_ms = if cache.entries.is_empty() {
            0
        } else {
            cache.length_ms.saturating_sub(drained)
        };
        self.room.notify_all();
        Ok(())
    }

    fn set_transfer_handler(&self, handler: Option<TransferHandler>) {
        let substitute = {
            let mut cache = self.cache.lock();
            cache.generation += 1;
            let generation = cache.generation;
            let substitute = handler.as_ref().map(|_| {
                let weak = self.this.clone();
                transfer_handler(move |_| {
                    let Some(cache) = weak.upgrade() else {
                        return;
                    };
                    if let Some(downstream) = cache.on_upstream_data(generation) {
                        downstream(cache.as_ref());
                    }
                })
            });
            cache.handler = handler;
            self.room.notify_all();
            substitute
        };
        self.stream.set_transfer_handler(substitute);
    }

    fn end_of_stream(&self) -> bool {
        self.stream.end_of_stream()
    }

    fn controls(&self) -> Vec<Control> {
        let mut controls = self.stream.controls();
        if self.owns_control {
            controls.push(Control::Buffer(self.control.clone()));
        }
        controls
    }
}
