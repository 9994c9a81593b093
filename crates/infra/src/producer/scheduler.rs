//! Retry scheduler: re-drains the producer repository through the admission path.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use eventbus_core::{Event, SendError};
use eventbus_events::ProducerRepository;

/// Called once per resent event after its outcome was marked, with the number of other
/// sends still waiting in the ordering queue.
pub type OutcomeHook = Box<dyn FnOnce(usize) + Send + 'static>;

/// Where the scheduler resubmits events (the producer's admission path).
pub trait ResendTarget: Send + Sync {
    fn resend(&self, event: Event, on_outcome: OutcomeHook) -> Result<(), SendError>;
}

/// Result of a single scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A previous batch is still in flight.
    Skipped,
    /// Nothing waiting in the repository.
    Idle,
    /// This many events were resubmitted.
    Dispatched(usize),
}

/// Scheduler runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub skipped: u64,
    pub resent: u64,
    pub immediate_reschedules: u64,
}

#[derive(Debug)]
enum Signal {
    Wake,
    Shutdown,
}

/// Periodically pulls pending events from the repository and resends them.
///
/// Waits the full fetch period while idle. When every event of a batch has its outcome
/// marked and the ordering queue is below half its quota, the next tick runs
/// immediately, so a backlog drains as fast as the transport accepts it.
pub struct RetryScheduler {
    name: String,
    repository: Arc<dyn ProducerRepository>,
    fetch_count: usize,
    max_quota: usize,
    in_flight: AtomicUsize,
    reschedule_now: AtomicBool,
    wake: Mutex<Option<mpsc::Sender<Signal>>>,
    stats: Mutex<SchedulerStats>,
}

impl core::fmt::Debug for RetryScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RetryScheduler")
            .field("name", &self.name)
            .field("fetch_count", &self.fetch_count)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl RetryScheduler {
    pub fn new(
        name: impl Into<String>,
        repository: Arc<dyn ProducerRepository>,
        fetch_count: usize,
        max_quota: usize,
    ) -> Self {
        Self {
            name: name.into(),
            repository,
            fetch_count,
            max_quota,
            in_flight: AtomicUsize::new(0),
            reschedule_now: AtomicBool::new(false),
            wake: Mutex::new(None),
            stats: Mutex::new(SchedulerStats::default()),
        }
    }

    /// Resent events whose outcome is not yet marked.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Delay before the next tick of the background loop.
    pub fn next_delay(&self, fetch_period: Duration) -> Duration {
        if self.reschedule_now.load(Ordering::SeqCst) {
            Duration::ZERO
        } else {
            fetch_period
        }
    }

    fn with_stats(&self, f: impl FnOnce(&mut SchedulerStats)) {
        f(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// Run one scheduling pass against `target`.
    pub fn tick(self: &Arc<Self>, target: &dyn ResendTarget) -> TickOutcome {
        self.with_stats(|s| s.ticks += 1);

        if self.in_flight() > 0 {
            trace!(scheduler = %self.name, in_flight = self.in_flight(), "previous batch in flight, skipping tick");
            self.with_stats(|s| s.skipped += 1);
            return TickOutcome::Skipped;
        }

        let batch = match self.repository.waiting_for_send(self.fetch_count) {
            Ok(batch) => batch,
            Err(err) => {
                error!(scheduler = %self.name, error = %err, "failed to load events waiting for send");
                return TickOutcome::Idle;
            }
        };
        if batch.is_empty() {
            trace!(scheduler = %self.name, "no events waiting for send");
            return TickOutcome::Idle;
        }

        let count = batch.len();
        debug!(scheduler = %self.name, count, "resending stored events");
        self.in_flight.fetch_add(count, Ordering::SeqCst);

        for mut event in batch {
            event.mark_resent();
            let event_id = event.id();
            let this = Arc::clone(self);
            if let Err(err) = target.resend(event, Box::new(move |depth| this.outcome_marked(depth))) {
                warn!(scheduler = %self.name, event_id = %event_id, error = %err, "resend rejected");
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        }

        self.with_stats(|s| s.resent += count as u64);
        TickOutcome::Dispatched(count)
    }

    fn outcome_marked(&self, queue_depth: usize) {
        let previous = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if previous != 1 || queue_depth >= self.max_quota / 2 {
            return;
        }

        self.reschedule_now.store(true, Ordering::SeqCst);
        self.with_stats(|s| s.immediate_reschedules += 1);
        if let Some(tx) = self
            .wake
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            let _ = tx.send(Signal::Wake);
        }
    }

    /// Spawn the background loop. It stops on shutdown or once `target` is dropped.
    pub fn spawn<T>(self: &Arc<Self>, target: Weak<T>, fetch_period: Duration) -> SchedulerHandle
    where
        T: ResendTarget + 'static,
    {
        let (tx, rx) = mpsc::channel::<Signal>();
        *self.wake.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx.clone());

        let scheduler = Arc::clone(self);
        let join = thread::Builder::new()
            .name(format!("{}-retry", self.name))
            .spawn(move || scheduler_loop(&scheduler, &target, &rx, fetch_period))
            .expect("failed to spawn retry scheduler thread");

        SchedulerHandle {
            shutdown: tx,
            join: Some(join),
        }
    }
}

fn scheduler_loop<T: ResendTarget>(
    scheduler: &Arc<RetryScheduler>,
    target: &Weak<T>,
    rx: &mpsc::Receiver<Signal>,
    fetch_period: Duration,
) {
    info!(scheduler = %scheduler.name, period_ms = fetch_period.as_millis() as u64, "retry scheduler started");

    loop {
        let delay = scheduler.next_delay(fetch_period);
        scheduler.reschedule_now.store(false, Ordering::SeqCst);

        match rx.recv_timeout(delay) {
            Ok(Signal::Shutdown) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Ok(Signal::Wake) | Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        let Some(target) = target.upgrade() else {
            break;
        };
        scheduler.tick(target.as_ref());
    }

    scheduler
        .wake
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    info!(scheduler = %scheduler.name, "retry scheduler stopped");
}

/// Handle to stop and join the background loop.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: mpsc::Sender<Signal>,
    join: Option<thread::JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Request shutdown and wait for the loop to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(Signal::Shutdown);
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}
