//! Consumer pipeline: intake, worker-pool dispatch, outcome marking.
//!
//! ```text
//! record ──► duplicate? ──yes──► drop (offset completed)
//!               │no
//!               ▼
//!          EventQueue ──► worker: dequeue ──► watchdog ──► consumed/blacklisted? ──► skip
//!                                                                │no
//!                                              HandlerRegistry ──► handlers ──► mark
//!                                                                                  │
//!                                     queue.complete ◄── offsets.complete ◄────────┘
//! ```

mod poller;
mod pool;
mod read_loop;
mod watchdog;

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, info, info_span, warn};

use eventbus_core::{ConsumeError, DeliveryState, Event, EventId};
use eventbus_events::{
    ConsumerRepository, DispatchContext, EventQueue, HandlerRegistry, QueueError, QueueSlot,
    Record, SequentialEventQueue, UnorderedEventQueue,
};
use eventbus_observability::{MetricsSink, NoopMetrics};

use crate::config::{ConfigError, ConsumerConfig};
use crate::offsets::OffsetCommitTracker;

use pool::{UnitOutcome, WorkerPool};

pub use poller::{PollerHandle, RepositoryPoller};
pub use read_loop::{ReadLoop, ReadLoopHandle, ReadLoopStats};
pub use watchdog::{BlockedEvent, BlockedEventChecker, Ticket, WatchdogHandle};

/// Events matching the blacklist are never dispatched.
pub type Blacklist = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// What intake did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intake {
    Enqueued,
    /// Already seen by the repository (or its offset is already tracked); dropped.
    Duplicate,
}

/// Builder wiring a consumer to its collaborators.
pub struct ConsumerBuilder {
    config: ConsumerConfig,
    registry: Arc<HandlerRegistry>,
    queue: Option<Arc<dyn EventQueue>>,
    repository: Option<Arc<dyn ConsumerRepository>>,
    blacklist: Option<Blacklist>,
    offsets: Option<Arc<OffsetCommitTracker>>,
    metrics: Arc<dyn MetricsSink>,
}

impl ConsumerBuilder {
    /// Process events sharing a correlation key one at a time, in arrival order.
    pub fn sequential_by<F>(mut self, key_of: F) -> Self
    where
        F: Fn(&Event) -> Option<String> + Send + Sync + 'static,
    {
        let capacity = self.config.queue_capacity();
        self.queue = Some(Arc::new(SequentialEventQueue::new(capacity, key_of)));
        self
    }

    /// Use an explicitly constructed intake queue.
    pub fn with_queue(mut self, queue: Arc<dyn EventQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_repository(mut self, repository: Arc<dyn ConsumerRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_blacklist<F>(mut self, blacklisted: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.blacklist = Some(Arc::new(blacklisted));
        self
    }

    /// Track record offsets so a read loop can commit the completed prefix.
    pub fn with_offset_tracker(mut self, offsets: Arc<OffsetCommitTracker>) -> Self {
        self.offsets = Some(offsets);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Validate the configuration and start workers (and the watchdog, if enabled).
    pub fn start(self) -> Result<Consumer, ConfigError> {
        self.config.validate()?;

        let queue = self.queue.unwrap_or_else(|| {
            Arc::new(UnorderedEventQueue::new(self.config.queue_capacity()))
        });
        let pool = WorkerPool::new(&self.config.name, self.config.worker_pool_size);

        let watchdog = self
            .config
            .blocked_threshold()
            .map(|threshold| Arc::new(BlockedEventChecker::new(threshold)));
        let watchdog_handle = watchdog.as_ref().map(|w| {
            let interval = self.config.watchdog_interval.unwrap_or(w.threshold());
            w.spawn(&self.config.name, interval)
        });

        info!(
            consumer = %self.config.name,
            workers = self.config.worker_pool_size,
            capacity = self.config.max_quota,
            watchdog = watchdog.is_some(),
            "consumer started"
        );

        Ok(Consumer {
            inner: Arc::new(ConsumerInner {
                config: self.config,
                registry: self.registry,
                queue,
                pool,
                repository: self.repository,
                blacklist: self.blacklist,
                offsets: self.offsets,
                watchdog,
                watchdog_handle: Mutex::new(watchdog_handle),
                metrics: self.metrics,
                in_flight: Mutex::new(HashSet::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }
}

/// Dispatches events to registered handlers on a fixed worker pool.
///
/// Cloning is cheap; clones share the queue, the workers and the registry.
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<ConsumerInner>,
}

struct ConsumerInner {
    config: ConsumerConfig,
    registry: Arc<HandlerRegistry>,
    queue: Arc<dyn EventQueue>,
    pool: WorkerPool,
    repository: Option<Arc<dyn ConsumerRepository>>,
    blacklist: Option<Blacklist>,
    offsets: Option<Arc<OffsetCommitTracker>>,
    watchdog: Option<Arc<BlockedEventChecker>>,
    watchdog_handle: Mutex<Option<WatchdogHandle>>,
    metrics: Arc<dyn MetricsSink>,
    /// Ids enqueued or being dispatched.
    in_flight: Mutex<HashSet<EventId>>,
    closed: AtomicBool,
}

impl core::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Consumer")
            .field("name", &self.inner.config.name)
            .field("queued", &self.inner.queue.size())
            .field("pending", &self.inner.pool.pending())
            .field("closed", &self.inner.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl Consumer {
    pub fn builder(config: ConsumerConfig, registry: Arc<HandlerRegistry>) -> ConsumerBuilder {
        ConsumerBuilder {
            config,
            registry,
            queue: None,
            repository: None,
            blacklist: None,
            offsets: None,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Accept an event (duplicate-checked against the repository) for dispatch.
    pub fn accept(&self, event: Event) -> Result<Intake, ConsumeError> {
        self.inner.accept(QueueSlot::new(event), true)
    }

    /// Accept a transport record: its offset is tracked before the event is enqueued
    /// and completed once it was dispatched (or dropped as a duplicate).
    pub fn accept_record(&self, record: Record) -> Result<Intake, ConsumeError> {
        if let Some(offsets) = &self.inner.offsets {
            if !offsets.track(&record.partition, record.offset) {
                return Ok(Intake::Duplicate);
            }
        }
        let slot = QueueSlot::new(record.event).with_origin(record.partition, record.offset);
        self.inner.accept(slot, true)
    }

    /// Accept an event loaded from the repository (already recorded, no duplicate check).
    pub fn accept_stored(&self, event: Event) -> Result<Intake, ConsumeError> {
        self.inner.accept(QueueSlot::new(event), false)
    }

    /// Dispatch units submitted but not finished.
    pub fn wait_for_handle(&self) -> usize {
        self.inner.pool.pending()
    }

    pub fn is_in_flight(&self, event_id: EventId) -> bool {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&event_id)
    }

    pub fn queue(&self) -> Arc<dyn EventQueue> {
        Arc::clone(&self.inner.queue)
    }

    pub fn offsets(&self) -> Option<Arc<OffsetCommitTracker>> {
        self.inner.offsets.clone()
    }

    pub fn repository(&self) -> Option<Arc<dyn ConsumerRepository>> {
        self.inner.repository.clone()
    }

    pub fn watchdog(&self) -> Option<Arc<BlockedEventChecker>> {
        self.inner.watchdog.clone()
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> Arc<dyn MetricsSink> {
        Arc::clone(&self.inner.metrics)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Start the repository poller when `consume_fetch_period` is set and a repository
    /// is configured.
    pub fn start_poller(&self) -> Option<PollerHandle> {
        let period = self.inner.config.consume_fetch_period?;
        let repository = self.inner.repository.clone()?;
        let poller = RepositoryPoller::new(
            self.clone(),
            repository,
            self.inner.config.consume_fetch_count,
        );
        Some(poller.spawn(period))
    }

    /// Stop intake, let submitted units finish within the configured bounded wait,
    /// then interrupt blocked workers. Returns the dispatch units left unfinished.
    pub fn close(&self) -> usize {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return self.inner.pool.pending();
        }

        let remaining = self
            .inner
            .pool
            .shutdown(self.inner.config.shutdown_timeout, self.inner.queue.as_ref());

        let handle = self
            .inner
            .watchdog_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.shutdown();
        }

        info!(consumer = %self.inner.config.name, remaining, "consumer closed");
        remaining
    }
}

impl ConsumerInner {
    fn accept(self: &Arc<Self>, slot: QueueSlot, check_duplicate: bool) -> Result<Intake, ConsumeError> {
        if self.closed.load(Ordering::SeqCst) {
            self.untrack(&slot);
            return Err(ConsumeError::Closed);
        }

        let event = &slot.event;
        if check_duplicate && self.is_duplicate(event) {
            info!(
                event_id = %event.id(),
                destination = event.destination(),
                resource = event.resource(),
                "duplicate event dropped"
            );
            self.metrics.consume_skipped();
            if let (Some(offsets), Some(origin)) = (&self.offsets, &slot.origin) {
                offsets.complete(&origin.partition, origin.offset);
            }
            return Ok(Intake::Duplicate);
        }

        debug!(
            event_id = %event.id(),
            destination = event.destination(),
            resource = event.resource(),
            operation = event.operation(),
            "event received"
        );
        let event_id = event.id();
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event_id);

        // The unit is submitted before the slot is pushed, so a pool closed in between
        // leaves nothing queued. The unit blocks in `dequeue` until the push lands.
        let inner = Arc::clone(self);
        if let Err(err) = self
            .pool
            .submit(Box::new(move |worker: &str| inner.run_unit(worker)))
        {
            self.in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&event_id);
            self.untrack(&slot);
            return Err(err);
        }
        self.queue.push(slot);
        Ok(Intake::Enqueued)
    }

    /// Forget the offset of a record that was never dispatched, so it is redelivered.
    fn untrack(&self, slot: &QueueSlot) {
        if let (Some(offsets), Some(origin)) = (&self.offsets, &slot.origin) {
            offsets.untrack(&origin.partition, origin.offset);
        }
    }

    fn persisting(&self, event: &Event) -> Option<&Arc<dyn ConsumerRepository>> {
        self.repository
            .as_ref()
            .filter(|repo| repo.should_persist(event))
    }

    fn is_duplicate(&self, event: &Event) -> bool {
        let Some(repo) = self.persisting(event) else {
            return false;
        };
        match repo.insert(event) {
            Ok(duplicate) => duplicate,
            Err(err) => {
                warn!(event_id = %event.id(), error = %err, "duplicate check failed, dispatching anyway");
                false
            }
        }
    }

    /// One dispatch unit: dequeue, process, release.
    fn run_unit(&self, worker: &str) -> UnitOutcome {
        let slot = match self.queue.dequeue() {
            Ok(slot) => slot,
            Err(QueueError::Interrupted) => {
                debug!(worker, "dequeue interrupted");
                return UnitOutcome::Interrupted;
            }
        };

        let event = &slot.event;
        self.metrics.consume_started();
        let ticket = self.watchdog.as_ref().map(|w| w.register(event.id()));
        let ctx = DispatchContext::new(event.id(), worker);

        {
            let span = info_span!("dispatch", event_id = %event.id(), worker);
            let _guard = span.enter();
            self.process(event, &ctx);
        }

        self.queue.complete(event);
        if let (Some(w), Some(t)) = (&self.watchdog, ticket) {
            w.complete(t);
        }
        if let (Some(offsets), Some(origin)) = (&self.offsets, &slot.origin) {
            offsets.complete(&origin.partition, origin.offset);
        }
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&event.id());
        self.metrics.consume_finished(ctx.elapsed());
        UnitOutcome::Done
    }

    fn process(&self, event: &Event, ctx: &DispatchContext) {
        if self.already_consumed(event) {
            debug!(event_id = %event.id(), "event already consumed, skipping");
            self.metrics.consume_skipped();
            return;
        }

        if self.blacklist.as_ref().is_some_and(|b| b(event)) {
            info!(
                event_id = %event.id(),
                destination = event.destination(),
                resource = event.resource(),
                "blacklisted event skipped"
            );
            self.metrics.consume_skipped();
            self.mark(event, DeliveryState::Expired);
            return;
        }

        let handlers = self
            .registry
            .find_all_matching(event.destination(), event.resource());
        if handlers.is_empty() {
            warn!(
                event_id = %event.id(),
                destination = event.destination(),
                resource = event.resource(),
                "no handler for event"
            );
        }

        let mut failed = false;
        for handler in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(event, ctx))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(event_id = %event.id(), error = ?err, "event handler failed");
                    failed = true;
                }
                Err(_) => {
                    error!(event_id = %event.id(), "event handler panicked");
                    failed = true;
                }
            }
        }

        let state = if failed {
            DeliveryState::Failed
        } else {
            DeliveryState::Succeeded
        };
        debug!(event_id = %event.id(), state = %state, elapsed_ms = ctx.elapsed().as_millis() as u64, "event handled");
        self.mark(event, state);
    }

    fn already_consumed(&self, event: &Event) -> bool {
        let Some(repo) = self.persisting(event) else {
            return false;
        };
        repo.is_consumed(event.id()).unwrap_or_else(|err| {
            warn!(event_id = %event.id(), error = %err, "consumed check failed");
            false
        })
    }

    fn mark(&self, event: &Event, state: DeliveryState) {
        if let Some(repo) = self.persisting(event) {
            if let Err(err) = repo.mark(event.id(), state) {
                warn!(event_id = %event.id(), state = %state, error = %err, "failed to mark consume outcome");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use eventbus_events::{InMemoryConsumerRepository, handler_fn};
    use eventbus_observability::InMemoryMetrics;

    use crate::test_support::wait_until;

    fn config() -> ConsumerConfig {
        ConsumerConfig::default()
            .with_worker_pool_size(4)
            .with_max_quota(100)
    }

    fn event(resource: &str) -> Event {
        Event::new("orders", resource, "created", Default::default())
    }

    fn counting_registry(hits: &Arc<AtomicUsize>) -> Arc<HandlerRegistry> {
        let registry = Arc::new(HandlerRegistry::new());
        let hits = hits.clone();
        registry.register(
            Some("orders"),
            None,
            handler_fn(move |_, _| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        registry
    }

    #[test]
    fn duplicate_never_reaches_a_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let repo = Arc::new(InMemoryConsumerRepository::new());
        let consumer = Consumer::builder(config(), counting_registry(&hits))
            .with_repository(repo.clone())
            .start()
            .unwrap();

        let ev = event("order");
        assert_eq!(consumer.accept(ev.clone()).unwrap(), Intake::Enqueued);
        assert_eq!(consumer.accept(ev.clone()).unwrap(), Intake::Duplicate);

        assert_eq!(consumer.close(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(repo.state(ev.id()), Some(DeliveryState::Succeeded));
    }

    #[test]
    fn handler_error_and_panic_mark_failed() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register(
            None,
            Some("bad"),
            handler_fn(|_, _| anyhow::bail!("rejected")),
        );
        registry.register(
            None,
            Some("worse"),
            handler_fn(|_, _| -> anyhow::Result<()> { panic!("handler bug") }),
        );
        let repo = Arc::new(InMemoryConsumerRepository::new());
        let consumer = Consumer::builder(config(), registry)
            .with_repository(repo.clone())
            .start()
            .unwrap();

        let bad = event("bad");
        let worse = event("worse");
        consumer.accept(bad.clone()).unwrap();
        consumer.accept(worse.clone()).unwrap();

        assert_eq!(consumer.close(), 0);
        assert_eq!(repo.state(bad.id()), Some(DeliveryState::Failed));
        assert_eq!(repo.state(worse.id()), Some(DeliveryState::Failed));
    }

    #[test]
    fn blacklisted_event_is_expired_without_dispatch() {
        let hits = Arc::new(AtomicUsize::new(0));
        let repo = Arc::new(InMemoryConsumerRepository::new());
        let metrics = Arc::new(InMemoryMetrics::new());
        let consumer = Consumer::builder(config(), counting_registry(&hits))
            .with_repository(repo.clone())
            .with_blacklist(|e| e.resource() == "spam")
            .with_metrics(metrics.clone())
            .start()
            .unwrap();

        let spam = event("spam");
        consumer.accept(spam.clone()).unwrap();
        consumer.accept(event("order")).unwrap();

        assert_eq!(consumer.close(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(repo.state(spam.id()), Some(DeliveryState::Expired));
        assert_eq!(metrics.snapshot().consume_skipped, 1);
        assert_eq!(metrics.snapshot().consume_finished, 2);
    }

    #[test]
    fn already_consumed_event_is_skipped() {
        let hits = Arc::new(AtomicUsize::new(0));
        let repo = Arc::new(InMemoryConsumerRepository::new());
        let ev = event("order");
        repo.insert(&ev).unwrap();
        repo.mark(ev.id(), DeliveryState::Succeeded).unwrap();

        let consumer = Consumer::builder(config(), counting_registry(&hits))
            .with_repository(repo.clone())
            .start()
            .unwrap();
        consumer.accept_stored(ev.clone()).unwrap();

        assert_eq!(consumer.close(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn event_without_handler_still_completes() {
        let registry = Arc::new(HandlerRegistry::new());
        let repo = Arc::new(InMemoryConsumerRepository::new());
        let consumer = Consumer::builder(config(), registry)
            .with_repository(repo.clone())
            .start()
            .unwrap();

        let ev = event("order");
        consumer.accept(ev.clone()).unwrap();
        assert!(wait_until(|| consumer.wait_for_handle() == 0));
        assert_eq!(repo.state(ev.id()), Some(DeliveryState::Succeeded));
        assert!(!consumer.is_in_flight(ev.id()));
        assert_eq!(consumer.close(), 0);
    }

    #[test]
    fn sequential_mode_serializes_a_key() {
        let active = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(HandlerRegistry::new());
        {
            let (active, overlaps) = (active.clone(), overlaps.clone());
            registry.register(
                None,
                None,
                handler_fn(move |_, _| {
                    if active.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    std::thread::sleep(Duration::from_millis(2));
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }),
            );
        }

        let consumer = Consumer::builder(config(), registry)
            .sequential_by(|e| Some(e.resource().to_string()))
            .start()
            .unwrap();
        for _ in 0..20 {
            consumer.accept(event("same-key")).unwrap();
        }

        assert_eq!(consumer.close(), 0);
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn watchdog_tracks_dispatches_in_progress() {
        let (release, gate) = std::sync::mpsc::channel::<()>();
        let gate = Mutex::new(gate);
        let registry = Arc::new(HandlerRegistry::new());
        registry.register(
            None,
            None,
            handler_fn(move |_, _| {
                let _ = gate.lock().unwrap().recv();
                Ok(())
            }),
        );

        let consumer = Consumer::builder(
            config()
                .with_blocked_threshold_ms(10)
                .with_watchdog_interval(Duration::from_secs(3600)),
            registry,
        )
        .start()
        .unwrap();
        let ev = event("order");
        consumer.accept(ev.clone()).unwrap();

        let watchdog = consumer.watchdog().unwrap();
        assert!(wait_until(|| watchdog.len() == 1));
        std::thread::sleep(Duration::from_millis(20));
        let blocked = watchdog.sweep(std::time::Instant::now());
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].event_id, ev.id());

        release.send(()).unwrap();
        assert_eq!(consumer.close(), 0);
        assert!(watchdog.is_empty());
    }

    #[test]
    fn close_rejects_further_intake() {
        let hits = Arc::new(AtomicUsize::new(0));
        let consumer = Consumer::builder(config(), counting_registry(&hits))
            .start()
            .unwrap();
        assert_eq!(consumer.close(), 0);
        assert_eq!(consumer.accept(event("order")), Err(ConsumeError::Closed));
    }

    #[test]
    fn record_rejected_by_a_closing_pool_leaves_no_trace() {
        let hits = Arc::new(AtomicUsize::new(0));
        let offsets = Arc::new(OffsetCommitTracker::new());
        let consumer = Consumer::builder(config(), counting_registry(&hits))
            .with_offset_tracker(offsets.clone())
            .start()
            .unwrap();
        let tp = eventbus_events::TopicPartition::new("orders", 0);

        // The pool stops accepting units before the consumer flags itself closed.
        consumer
            .inner
            .pool
            .shutdown(Duration::from_millis(50), consumer.inner.queue.as_ref());

        let ev = event("order");
        let record = Record::new(tp.clone(), 0, ev.clone());
        assert_eq!(consumer.accept_record(record), Err(ConsumeError::Closed));
        assert_eq!(consumer.queue().size(), 0);
        assert!(!consumer.is_in_flight(ev.id()));
        assert_eq!(offsets.in_flight(&tp), 0);
        assert!(offsets.track(&tp, 0), "offset is free for redelivery");

        assert_eq!(consumer.close(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn record_rejected_after_close_is_not_tracked() {
        let offsets = Arc::new(OffsetCommitTracker::new());
        let consumer = Consumer::builder(config(), Arc::new(HandlerRegistry::new()))
            .with_offset_tracker(offsets.clone())
            .start()
            .unwrap();
        let tp = eventbus_events::TopicPartition::new("orders", 0);
        assert_eq!(consumer.close(), 0);

        let record = Record::new(tp.clone(), 7, event("order"));
        assert_eq!(consumer.accept_record(record), Err(ConsumeError::Closed));
        assert_eq!(offsets.in_flight(&tp), 0);
    }

    #[test]
    fn invalid_config_is_rejected_at_start() {
        let registry = Arc::new(HandlerRegistry::new());
        let err = Consumer::builder(config().with_worker_pool_size(0), registry)
            .start()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Zero { .. }));
    }
}
