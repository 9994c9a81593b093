//! Durable repositories behind the pipelines (narrow contracts).
//!
//! Persistence of pending/consumed events lives outside this workspace. Pipelines call
//! these traits on hot paths and **never propagate** their errors: failures are logged
//! and absorbed so storage trouble cannot stall sending or consuming.

use std::sync::Arc;

use eventbus_core::{DeliveryState, Event, EventId, RepositoryError};

/// Producer-side store of events that must not be lost.
///
/// Events accepted by [`ProducerRepository::should_persist`] are written synchronously
/// on admission and transmitted later by the retry scheduler. Stores should count
/// failed attempts and stop returning events that failed too often.
pub trait ProducerRepository: Send + Sync {
    /// Durably record an unsent event.
    fn insert(&self, event: &Event) -> Result<(), RepositoryError>;

    /// Up to `limit` events not yet in a terminal state, oldest first.
    fn waiting_for_send(&self, limit: usize) -> Result<Vec<Event>, RepositoryError>;

    /// Record the outcome of a send. Must be cheap: it runs on the send callback path.
    fn mark(&self, event_id: EventId, state: DeliveryState) -> Result<(), RepositoryError>;

    /// Whether this event class is worth persisting. Low-value traffic (notifications,
    /// e-mails) can opt out and accept loss on transport failure.
    fn should_persist(&self, _event: &Event) -> bool {
        true
    }
}

/// Consumer-side store used for duplicate detection and outcome tracking.
pub trait ConsumerRepository: Send + Sync {
    /// Atomically record the event id. Returns `true` when the id was already present
    /// (the event is a duplicate and must not reach a handler).
    fn insert(&self, event: &Event) -> Result<bool, RepositoryError>;

    /// Up to `limit` recorded events not yet in a terminal state, oldest first.
    fn waiting_for_consume(&self, limit: usize) -> Result<Vec<Event>, RepositoryError>;

    fn mark(&self, event_id: EventId, state: DeliveryState) -> Result<(), RepositoryError>;

    /// Whether the event already reached a terminal consume state.
    fn is_consumed(&self, _event_id: EventId) -> Result<bool, RepositoryError> {
        Ok(false)
    }

    fn should_persist(&self, _event: &Event) -> bool {
        true
    }
}

impl<R> ProducerRepository for Arc<R>
where
    R: ProducerRepository + ?Sized,
{
    fn insert(&self, event: &Event) -> Result<(), RepositoryError> {
        (**self).insert(event)
    }

    fn waiting_for_send(&self, limit: usize) -> Result<Vec<Event>, RepositoryError> {
        (**self).waiting_for_send(limit)
    }

    fn mark(&self, event_id: EventId, state: DeliveryState) -> Result<(), RepositoryError> {
        (**self).mark(event_id, state)
    }

    fn should_persist(&self, event: &Event) -> bool {
        (**self).should_persist(event)
    }
}

impl<R> ConsumerRepository for Arc<R>
where
    R: ConsumerRepository + ?Sized,
{
    fn insert(&self, event: &Event) -> Result<bool, RepositoryError> {
        (**self).insert(event)
    }

    fn waiting_for_consume(&self, limit: usize) -> Result<Vec<Event>, RepositoryError> {
        (**self).waiting_for_consume(limit)
    }

    fn mark(&self, event_id: EventId, state: DeliveryState) -> Result<(), RepositoryError> {
        (**self).mark(event_id, state)
    }

    fn is_consumed(&self, event_id: EventId) -> Result<bool, RepositoryError> {
        (**self).is_consumed(event_id)
    }

    fn should_persist(&self, event: &Event) -> bool {
        (**self).should_persist(event)
    }
}
