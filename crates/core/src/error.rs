//! Error model shared by the pipelines and their collaborators.

use thiserror::Error;

use crate::id::EventId;

/// Admission failure surfaced synchronously to a producer's caller.
///
/// `Throttled` is an admission-control signal: the caller may retry later, the event
/// was neither queued nor persisted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("too many requests: send queue exceeds max quota {max_quota}")]
    Throttled { max_quota: usize },

    #[error("producer is closed")]
    Closed,
}

impl SendError {
    pub fn is_throttled(&self) -> bool {
        matches!(self, SendError::Throttled { .. })
    }
}

/// Failure reported by the transport client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("send failed: {0}")]
    Send(String),

    #[error("poll failed: {0}")]
    Poll(String),

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("transport is closed")]
    Closed,
}

impl TransportError {
    pub fn send(msg: impl Into<String>) -> Self {
        Self::Send(msg.into())
    }

    pub fn commit(msg: impl Into<String>) -> Self {
        Self::Commit(msg.into())
    }
}

/// Failure reported by a pending/consumed event repository.
///
/// Pipelines never propagate these on the hot path: they are logged and absorbed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("event not found: {0}")]
    NotFound(EventId),

    #[error("repository lock poisoned")]
    Poisoned,
}

impl RepositoryError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}

/// Intake failure on the consumer side.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsumeError {
    #[error("consumer is closed")]
    Closed,
}
