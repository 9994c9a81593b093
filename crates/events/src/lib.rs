//! Event plumbing shared by the producer and consumer pipelines.
//!
//! - Collaborator contracts: [`transport`] streams and [`repository`] stores
//! - Queue primitives: [`OrderingQueue`] (producer) and [`queue`] (consumer intake)
//! - [`HandlerRegistry`] routing events to business handlers
//! - [`in_memory`] collaborators for tests/dev

pub mod handler;
pub mod in_memory;
pub mod ordering;
pub mod pending;
pub mod queue;
pub mod repository;
pub mod transport;

pub use handler::{DispatchContext, EventHandler, HandlerPredicate, HandlerRegistry, handler_fn};
pub use in_memory::{InMemoryConsumerRepository, InMemoryProducerRepository, InMemoryTransport};
pub use ordering::OrderingQueue;
pub use pending::PendingCounter;
pub use queue::{
    EventQueue, KeyExtractor, QueueCapacity, QueueError, QueueSlot, RecordOrigin,
    SequentialEventQueue, UnorderedEventQueue,
};
pub use repository::{ConsumerRepository, ProducerRepository};
pub use transport::{ReadStream, Record, SendCallback, TopicPartition, WriteStream};
