//! Receive-thread to update-tick handoff
//!
//! The receive thread is the only producer and the tracker's tick is the
//! only consumer. [`LatestSlot`] keeps just the newest value, coalescing
//! anything the consumer did not pick up in time. [`FrameQueue`] keeps up to
//! `capacity` values and discards the oldest when full.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::TransportError;
use crate::skeleton::{FrameEvent, SkeletonDefinition};
use crate::transport::SkeletonSink;

/// Single-slot latest-value cell
#[derive(Debug)]
pub struct LatestSlot<T> {
    slot: Mutex<Option<T>>,
    overwritten: AtomicU64,
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
            overwritten: AtomicU64::new(0),
        }
    }
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, replacing any value not yet taken
    pub fn put(&self, value: T) {
        let previous = match self.slot.lock() {
            Ok(mut slot) => slot.replace(value),
            Err(poisoned) => poisoned.into_inner().replace(value),
        };
        if previous.is_some() {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take the stored value, leaving the slot empty
    pub fn take(&self) -> Option<T> {
        match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Number of values replaced before they were taken
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }
}

/// Bounded queue that drops the oldest entry when full
#[derive(Debug)]
pub struct FrameQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    dropped: AtomicU64,
}

impl<T> FrameQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            tx,
            rx,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, value: T) {
        let mut value = value;
        loop {
            match self.tx.try_send(value) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if self.rx.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    value = back;
                }
                // Both ends live in `self`
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    pub fn pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Everything currently queued, oldest first
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Entries discarded to make room
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Which handoff a consumer uses for frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandoffMode {
    /// Keep only the newest frame
    #[default]
    Latest,
    /// Keep a bounded backlog, dropping the oldest
    Queue,
}

#[derive(Debug)]
enum FrameBuffer {
    Latest(LatestSlot<FrameEvent>),
    Queue(FrameQueue<FrameEvent>),
}

/// Consumer-side staging area registered with a receiver.
///
/// Its callbacks only write into the handoff buffers; the tracker drains
/// them from its update tick.
#[derive(Debug)]
pub struct Staging {
    definition: LatestSlot<Arc<SkeletonDefinition>>,
    frames: FrameBuffer,
    receive_errors: AtomicU64,
}

impl Staging {
    pub fn new(mode: HandoffMode, queue_capacity: usize) -> Arc<Self> {
        let frames = match mode {
            HandoffMode::Latest => FrameBuffer::Latest(LatestSlot::new()),
            HandoffMode::Queue => FrameBuffer::Queue(FrameQueue::new(queue_capacity)),
        };
        Arc::new(Self {
            definition: LatestSlot::new(),
            frames,
            receive_errors: AtomicU64::new(0),
        })
    }

    /// Newest definition since the last call
    pub fn take_definition(&self) -> Option<Arc<SkeletonDefinition>> {
        self.definition.take()
    }

    /// Frames staged since the last call, oldest first
    pub fn take_frames(&self) -> Vec<FrameEvent> {
        match &self.frames {
            FrameBuffer::Latest(slot) => slot.take().into_iter().collect(),
            FrameBuffer::Queue(queue) => queue.drain(),
        }
    }

    /// Frames that were replaced or discarded before being consumed
    pub fn frames_dropped(&self) -> u64 {
        match &self.frames {
            FrameBuffer::Latest(slot) => slot.overwritten(),
            FrameBuffer::Queue(queue) => queue.dropped(),
        }
    }

    pub fn receive_errors(&self) -> u64 {
        self.receive_errors.load(Ordering::Relaxed)
    }
}

impl SkeletonSink for Staging {
    fn on_definition(&self, definition: Arc<SkeletonDefinition>) {
        self.definition.put(definition);
    }

    fn on_frame(&self, frame: FrameEvent) {
        match &self.frames {
            FrameBuffer::Latest(slot) => slot.put(frame),
            FrameBuffer::Queue(queue) => queue.push(frame),
        }
    }

    fn on_receive_error(&self, _error: &TransportError) {
        self.receive_errors.fetch_add(1, Ordering::Relaxed);
    }
}
