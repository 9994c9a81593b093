//! Bounded consumer intake queues.
//!
//! Two variants share one interface:
//!
//! - [`UnorderedEventQueue`]: plain FIFO, any worker may take any event.
//! - [`SequentialEventQueue`]: events sharing a correlation key are never handed out
//!   concurrently; independent keys proceed in parallel.
//!
//! Enqueue never rejects. Capacity only drives the watermarks the read loop uses to
//! pause and resume the transport.

use std::time::Instant;

use thiserror::Error;

use eventbus_core::Event;

use crate::transport::TopicPartition;

mod sequential;
mod unordered;

pub use sequential::{KeyExtractor, SequentialEventQueue};
pub use unordered::UnorderedEventQueue;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was interrupted while (or before) waiting; the worker should exit.
    #[error("queue interrupted")]
    Interrupted,
}

/// Where a queued event was read from, so its offset can be completed after dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOrigin {
    pub partition: TopicPartition,
    pub offset: u64,
}

/// An event plus admission metadata.
#[derive(Debug, Clone)]
pub struct QueueSlot {
    pub event: Event,
    pub enqueued_at: Instant,
    pub origin: Option<RecordOrigin>,
}

impl QueueSlot {
    pub fn new(event: Event) -> Self {
        Self {
            event,
            enqueued_at: Instant::now(),
            origin: None,
        }
    }

    pub fn with_origin(mut self, partition: TopicPartition, offset: u64) -> Self {
        self.origin = Some(RecordOrigin { partition, offset });
        self
    }
}

/// Capacity and watermark ratios of a bounded queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueCapacity {
    pub capacity: usize,
    pub high_ratio: f64,
    pub low_ratio: f64,
}

impl QueueCapacity {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            high_ratio: 1.0,
            low_ratio: 0.5,
        }
    }

    pub fn with_ratios(mut self, high_ratio: f64, low_ratio: f64) -> Self {
        self.high_ratio = high_ratio;
        self.low_ratio = low_ratio;
        self
    }

    pub(crate) fn watermarks(&self) -> Watermarks {
        let high = ((self.capacity as f64 * self.high_ratio).ceil() as usize).max(1);
        let low = ((self.capacity as f64 * self.low_ratio).floor() as usize).min(high - 1);
        Watermarks { high, low }
    }
}

/// Resolved high/low thresholds plus the latched "full" flag.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Watermarks {
    high: usize,
    low: usize,
}

impl Watermarks {
    /// Re-evaluate the latch after the size changed.
    ///
    /// Set at the high watermark, cleared only at or below the low watermark.
    pub(crate) fn update(&self, len: usize, full: &mut bool) {
        if len >= self.high {
            *full = true;
        } else if len <= self.low {
            *full = false;
        }
    }

    pub(crate) fn is_low(&self, len: usize) -> bool {
        len <= self.low
    }
}

/// Consumer-side intake buffer shared by the read loop and the worker pool.
pub trait EventQueue: Send + Sync {
    /// Append a slot. Never rejects; wakes one waiting worker.
    fn push(&self, slot: QueueSlot);

    /// Block until an eligible slot is available or the queue is interrupted.
    fn dequeue(&self) -> Result<QueueSlot, QueueError>;

    /// Events currently queued (checked-out events are not counted).
    fn size(&self) -> usize;

    /// Latched high-watermark flag.
    fn is_full(&self) -> bool;

    fn is_low_water_mark(&self) -> bool;

    /// The worker finished `event`. Releases its key in sequential mode.
    fn complete(&self, event: &Event);

    /// Wake every blocked `dequeue` with [`QueueError::Interrupted`].
    fn interrupt(&self);

    fn enqueue(&self, event: Event) {
        self.push(QueueSlot::new(event));
    }

    fn enqueue_all(&self, events: Vec<Event>) {
        for event in events {
            self.enqueue(event);
        }
    }
}

impl<Q> EventQueue for std::sync::Arc<Q>
where
    Q: EventQueue + ?Sized,
{
    fn push(&self, slot: QueueSlot) {
        (**self).push(slot)
    }

    fn dequeue(&self) -> Result<QueueSlot, QueueError> {
        (**self).dequeue()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn is_full(&self) -> bool {
        (**self).is_full()
    }

    fn is_low_water_mark(&self) -> bool {
        (**self).is_low_water_mark()
    }

    fn complete(&self, event: &Event) {
        (**self).complete(event)
    }

    fn interrupt(&self) {
        (**self).interrupt()
    }
}
