//! Transport collaborator contract (mechanics only).
//!
//! The wire-level client (connections, partition assignment, byte serialization) lives
//! outside this workspace. Pipelines only need the two narrow streams below.
//!
//! ## Delivery model
//!
//! - **Write side** is asynchronous: `send` returns immediately and reports the outcome
//!   through a one-shot callback, possibly on another thread.
//! - **Read side** is pull-based: `poll` returns records carrying partition/offset
//!   metadata; `commit` takes the next offset to read, acknowledging everything below it.
//! - **At-least-once**: records whose offsets were never committed are redelivered after
//!   a restart, so consumers must tolerate duplicates.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use eventbus_core::{Event, TransportError};

/// Logical partition of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: u32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: u32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl core::fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// A record pulled from the transport: the decoded event plus its log position.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub partition: TopicPartition,
    pub offset: u64,
    pub event: Event,
}

impl Record {
    pub fn new(partition: TopicPartition, offset: u64, event: Event) -> Self {
        Self {
            partition,
            offset,
            event,
        }
    }
}

/// One-shot completion of an asynchronous send. Receives the event back so the caller
/// can mark its outcome without keeping a copy.
pub type SendCallback = Box<dyn FnOnce(Event, Result<(), TransportError>) + Send + 'static>;

/// Write side of the transport.
///
/// Implementations must invoke `on_complete` exactly once per call, on success or
/// failure (including when the transport is closed).
pub trait WriteStream: Send + Sync {
    fn send(&self, event: Event, on_complete: SendCallback);
}

/// Read side of the transport.
///
/// `poll` blocks for at most `timeout` and may return an empty batch.
pub trait ReadStream: Send + Sync {
    fn poll(&self, timeout: Duration) -> Result<Vec<Record>, TransportError>;

    /// Acknowledge every record of `partition` below `offset` (the next offset to read).
    fn commit(&self, partition: &TopicPartition, offset: u64) -> Result<(), TransportError>;
}

impl<W> WriteStream for Arc<W>
where
    W: WriteStream + ?Sized,
{
    fn send(&self, event: Event, on_complete: SendCallback) {
        (**self).send(event, on_complete)
    }
}

impl<R> ReadStream for Arc<R>
where
    R: ReadStream + ?Sized,
{
    fn poll(&self, timeout: Duration) -> Result<Vec<Record>, TransportError> {
        (**self).poll(timeout)
    }

    fn commit(&self, partition: &TopicPartition, offset: u64) -> Result<(), TransportError> {
        (**self).commit(partition, offset)
    }
}
