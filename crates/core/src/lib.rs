//! `eventbus-core`: the message unit and the vocabulary shared by every pipeline.
//!
//! This crate contains **pure data** (no threads, no IO): the event envelope, its
//! identifier, the per-side delivery state and the error types surfaced to callers.

pub mod error;
pub mod event;
pub mod id;
pub mod state;

pub use error::{ConsumeError, RepositoryError, SendError, TransportError};
pub use event::{Event, EventBody, EventHead, RESENT_EXTENSION};
pub use id::EventId;
pub use state::DeliveryState;
