//! Producer pipeline: admission control, ordered transmission, outcome marking.
//!
//! ```text
//! send ──► persist? ──yes──► repository ··· RetryScheduler ──► (resent) ─┐
//!            │no                                                         │
//!            ▼                                                           ▼
//!        throttle? ──yes──► SendError::Throttled                   OrderingQueue
//!            │no                                                         │
//!            └──────────────────────────────────────────────────────────►│
//!                                                     expired? ──► mark EXPIRED
//!                                                         │no
//!                                                   transport.send ──► callback ──► mark
//! ```

mod scheduler;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use eventbus_core::{DeliveryState, Event, EventId, SendError, TransportError};
use eventbus_events::ordering::Command;
use eventbus_events::{OrderingQueue, PendingCounter, ProducerRepository, WriteStream};
use eventbus_observability::{MetricsSink, NoopMetrics};

use crate::config::ProducerConfig;

pub use scheduler::{
    OutcomeHook, ResendTarget, RetryScheduler, SchedulerHandle, SchedulerStats, TickOutcome,
};

/// Builder wiring a producer to its collaborators.
pub struct ProducerBuilder {
    config: ProducerConfig,
    transport: Arc<dyn WriteStream>,
    repository: Option<Arc<dyn ProducerRepository>>,
    metrics: Arc<dyn MetricsSink>,
}

impl ProducerBuilder {
    /// Persist events through `repository` and resend them with a retry scheduler.
    pub fn with_repository(mut self, repository: Arc<dyn ProducerRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Start the ordering queue and, when a repository is configured, the retry scheduler.
    pub fn start(self) -> Producer {
        let queue = OrderingQueue::new(self.config.name.clone());
        let scheduler = self.repository.as_ref().map(|repo| {
            Arc::new(RetryScheduler::new(
                self.config.name.clone(),
                repo.clone(),
                self.config.fetch_count,
                self.config.max_quota,
            ))
        });

        let inner = Arc::new(ProducerInner {
            config: self.config,
            transport: self.transport,
            repository: self.repository,
            metrics: self.metrics,
            queue,
            closed: AtomicBool::new(false),
            scheduler: scheduler.clone(),
            scheduler_handle: Mutex::new(None),
        });

        if let Some(scheduler) = scheduler {
            let handle = scheduler.spawn(Arc::downgrade(&inner), inner.config.fetch_period);
            *inner
                .scheduler_handle
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }

        info!(producer = %inner.config.name, persistent = inner.repository.is_some(), "producer started");
        Producer { inner }
    }
}

/// Sends events to the transport in call order.
///
/// Cloning is cheap; clones share the same queue and scheduler.
#[derive(Clone)]
pub struct Producer {
    inner: Arc<ProducerInner>,
}

struct ProducerInner {
    config: ProducerConfig,
    transport: Arc<dyn WriteStream>,
    repository: Option<Arc<dyn ProducerRepository>>,
    metrics: Arc<dyn MetricsSink>,
    queue: OrderingQueue,
    closed: AtomicBool,
    scheduler: Option<Arc<RetryScheduler>>,
    scheduler_handle: Mutex<Option<SchedulerHandle>>,
}

impl core::fmt::Debug for Producer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Producer")
            .field("name", &self.inner.config.name)
            .field("pending", &self.inner.queue.size())
            .field("closed", &self.inner.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl Producer {
    pub fn builder(config: ProducerConfig, transport: Arc<dyn WriteStream>) -> ProducerBuilder {
        ProducerBuilder {
            config,
            transport,
            repository: None,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Admit an event.
    ///
    /// `Ok` means accepted: either persisted for scheduled transmission or queued for
    /// transmission. The transport outcome is only recorded in the repository.
    pub fn send(&self, event: Event) -> Result<(), SendError> {
        self.inner.admit(event, None)
    }

    /// Send commands queued but not yet finished.
    pub fn wait_for_send(&self) -> usize {
        self.inner.queue.size()
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.inner.config
    }

    /// The retry scheduler, when a repository is configured.
    pub fn retry_scheduler(&self) -> Option<Arc<RetryScheduler>> {
        self.inner.scheduler.clone()
    }

    /// Stop admission and the scheduler, then drain the ordering queue with the
    /// configured bounded wait. Returns the number of sends still outstanding.
    pub fn close(&self) -> usize {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return self.inner.queue.size();
        }

        let handle = self
            .inner
            .scheduler_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.shutdown();
        }

        let remaining = self.inner.queue.close(self.inner.config.shutdown_timeout);
        info!(producer = %self.inner.config.name, remaining, "producer closed");
        remaining
    }
}

impl ResendTarget for Producer {
    fn resend(&self, event: Event, on_outcome: OutcomeHook) -> Result<(), SendError> {
        self.inner.resend(event, on_outcome)
    }
}

impl ResendTarget for ProducerInner {
    fn resend(&self, event: Event, on_outcome: OutcomeHook) -> Result<(), SendError> {
        self.admit(event, Some(on_outcome))
    }
}

impl ProducerInner {
    fn admit(&self, event: Event, on_outcome: Option<OutcomeHook>) -> Result<(), SendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SendError::Closed);
        }

        let resent = event.is_resent();
        if let Some(repo) = self.persisting(&event).filter(|_| !resent) {
            match repo.insert(&event) {
                Ok(()) => {
                    debug!(event_id = %event.id(), destination = event.destination(), "event persisted for scheduled send");
                    return Ok(());
                }
                Err(err) => {
                    warn!(event_id = %event.id(), error = %err, "failed to persist event, sending directly");
                }
            }
        }

        if !resent && self.queue.size() > self.config.max_quota {
            self.metrics.send_throttled();
            warn!(
                event_id = %event.id(),
                destination = event.destination(),
                max_quota = self.config.max_quota,
                "send throttled"
            );
            return Err(SendError::Throttled {
                max_quota: self.config.max_quota,
            });
        }

        let command = self.send_command(event, on_outcome);
        self.queue.execute(command)?;
        self.metrics.send_enqueued();
        Ok(())
    }

    /// The repository, if it persists this event.
    fn persisting(&self, event: &Event) -> Option<&Arc<dyn ProducerRepository>> {
        self.repository
            .as_ref()
            .filter(|repo| repo.should_persist(event))
    }

    /// Command run on the ordering thread: drop expired events, transmit the rest.
    fn send_command(&self, event: Event, on_outcome: Option<OutcomeHook>) -> Command {
        let transport = Arc::clone(&self.transport);
        let in_command = Arc::new(AtomicBool::new(false));
        let outcome = OutcomeRecorder {
            event_id: event.id(),
            repository: self.persisting(&event).cloned(),
            metrics: Arc::clone(&self.metrics),
            depth: self.queue.depth_counter(),
            in_command: Arc::clone(&in_command),
            on_outcome,
        };

        Box::new(move || {
            in_command.store(true, Ordering::SeqCst);
            if event.is_expired_at(Utc::now().timestamp()) {
                info!(
                    event_id = %event.id(),
                    destination = event.destination(),
                    ttl_seconds = event.head().ttl_seconds(),
                    "event expired before send"
                );
                outcome.metrics.send_expired();
                outcome.finish(DeliveryState::Expired);
                return Ok(());
            }

            outcome.metrics.send_started();
            transport.send(
                event,
                Box::new(move |event, result| outcome.transmitted(event, result)),
            );
            in_command.store(false, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Everything a send needs after it left the caller: marking, metrics, the retry hook.
///
/// A recorder dropped without an outcome (the transport panicked or lost its callback)
/// settles the send as failed.
struct OutcomeRecorder {
    event_id: EventId,
    /// Set only when the event is persisted, taken once the outcome is marked.
    repository: Option<Arc<dyn ProducerRepository>>,
    metrics: Arc<dyn MetricsSink>,
    depth: Arc<PendingCounter>,
    /// True while the ordering command that owns this send is still running.
    in_command: Arc<AtomicBool>,
    on_outcome: Option<OutcomeHook>,
}

impl OutcomeRecorder {
    fn transmitted(self, event: Event, result: Result<(), TransportError>) {
        let duration = event.age_secs(Utc::now().timestamp());
        self.metrics.send_finished(result.is_ok(), duration);

        let state = match result {
            Ok(()) => {
                debug!(
                    event_id = %event.id(),
                    destination = event.destination(),
                    resource = event.resource(),
                    operation = event.operation(),
                    duration_secs = duration,
                    "event sent"
                );
                DeliveryState::Succeeded
            }
            Err(err) => {
                error!(
                    event_id = %event.id(),
                    destination = event.destination(),
                    error = %err,
                    "event send failed"
                );
                DeliveryState::Failed
            }
        };
        self.finish(state);
    }

    fn finish(mut self, state: DeliveryState) {
        self.settle(state);
    }

    fn settle(&mut self, state: DeliveryState) {
        if let Some(repo) = self.repository.take() {
            if let Err(err) = repo.mark(self.event_id, state) {
                warn!(event_id = %self.event_id, state = %state, error = %err, "failed to mark send outcome");
            }
        }

        if let Some(hook) = self.on_outcome.take() {
            // Depth still counts the running command when the outcome arrives inline.
            let running = usize::from(self.in_command.load(Ordering::SeqCst));
            hook(self.depth.get().saturating_sub(running));
        }
    }

    fn is_settled(&self) -> bool {
        self.repository.is_none() && self.on_outcome.is_none()
    }
}

impl Drop for OutcomeRecorder {
    fn drop(&mut self) {
        if self.is_settled() {
            return;
        }
        error!(event_id = %self.event_id, "send dropped without an outcome");
        self.metrics.send_finished(false, 0);
        self.settle(DeliveryState::Failed);
    }
}
