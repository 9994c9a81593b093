//! Business handlers and the registry that routes events to them.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use eventbus_core::{Event, EventId};

/// Per-dispatch context handed to every handler.
///
/// Carries the correlation data explicitly through the call chain, so handlers can log
/// with the triggering event id without thread-local state.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    event_id: EventId,
    worker: String,
    started_at: Instant,
}

impl DispatchContext {
    pub fn new(event_id: EventId, worker: impl Into<String>) -> Self {
        Self {
            event_id,
            worker: worker.into(),
            started_at: Instant::now(),
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    /// Name of the worker thread running the dispatch.
    pub fn worker(&self) -> &str {
        &self.worker
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Handles a consumed event.
///
/// Handlers must be idempotent: delivery is at-least-once. An `Err` (or a panic) marks
/// the event FAILED; it is not redelivered by the consumer.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &Event, ctx: &DispatchContext) -> anyhow::Result<()>;
}

impl<F> EventHandler for F
where
    F: Fn(&Event, &DispatchContext) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, event: &Event, ctx: &DispatchContext) -> anyhow::Result<()> {
        self(event, ctx)
    }
}

/// Pin a closure to the handler signature so its argument and return types are
/// inferred at the call site.
pub fn handler_fn<F>(f: F) -> F
where
    F: Fn(&Event, &DispatchContext) -> anyhow::Result<()> + Send + Sync,
{
    f
}

/// Predicate over `(topic, resource)`.
pub type HandlerPredicate = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

struct Binding {
    predicate: HandlerPredicate,
    handler: Arc<dyn EventHandler>,
}

/// Routes an event to every handler whose predicate accepts `(destination, resource)`.
///
/// Populated at start-up and read on every dispatch, so it is read-mostly: lookups take
/// a shared lock and registration may happen concurrently with dispatch. Invocation
/// order among matches is not part of the contract.
#[derive(Default)]
pub struct HandlerRegistry {
    bindings: RwLock<Vec<Binding>>,
}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("bindings", &self.len())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register for an exact `(topic, resource)` pair; `None` matches anything.
    pub fn register<H>(&self, topic: Option<&str>, resource: Option<&str>, handler: H)
    where
        H: EventHandler + 'static,
    {
        let topic = topic.map(str::to_owned);
        let resource = resource.map(str::to_owned);
        self.register_predicate(
            move |t, r| {
                topic.as_deref().is_none_or(|expected| expected == t)
                    && resource.as_deref().is_none_or(|expected| expected == r)
            },
            handler,
        );
    }

    /// Register with an arbitrary predicate over `(topic, resource)`.
    pub fn register_predicate<P, H>(&self, predicate: P, handler: H)
    where
        P: Fn(&str, &str) -> bool + Send + Sync + 'static,
        H: EventHandler + 'static,
    {
        self.register_shared(Arc::new(predicate), Arc::new(handler));
    }

    /// Register an already shared handler (e.g. one handler bound to several topics).
    pub fn register_shared(&self, predicate: HandlerPredicate, handler: Arc<dyn EventHandler>) {
        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        bindings.push(Binding { predicate, handler });
    }

    /// All handlers whose predicate accepts `(topic, resource)`.
    pub fn find_all_matching(&self, topic: &str, resource: &str) -> Vec<Arc<dyn EventHandler>> {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        bindings
            .iter()
            .filter(|b| (b.predicate)(topic, resource))
            .map(|b| b.handler.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
