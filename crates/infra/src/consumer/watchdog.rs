//! Stuck-handler watchdog.
//!
//! Advisory only: overdue dispatches are logged, never cancelled. In a shared worker
//! pool a slow handler is the usual cause of head-of-line blocking, so this surfaces it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use eventbus_core::EventId;

/// Registration returned by [`BlockedEventChecker::register`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

#[derive(Debug, Clone, Copy)]
struct Watch {
    event_id: EventId,
    started_at: Instant,
    deadline: Instant,
}

/// A dispatch that exceeded the threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedEvent {
    pub event_id: EventId,
    pub elapsed_ms: u64,
}

/// Registry of `(event, deadline)` pairs swept on a timer.
#[derive(Debug)]
pub struct BlockedEventChecker {
    threshold: Duration,
    next_ticket: AtomicU64,
    watches: Mutex<HashMap<Ticket, Watch>>,
}

impl BlockedEventChecker {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            next_ticket: AtomicU64::new(0),
            watches: Mutex::new(HashMap::new()),
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn register(&self, event_id: EventId) -> Ticket {
        let ticket = Ticket(self.next_ticket.fetch_add(1, Ordering::Relaxed));
        let started_at = Instant::now();
        self.watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                ticket,
                Watch {
                    event_id,
                    started_at,
                    deadline: started_at + self.threshold,
                },
            );
        ticket
    }

    pub fn complete(&self, ticket: Ticket) {
        self.watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&ticket);
    }

    /// Dispatches still being watched.
    pub fn len(&self) -> usize {
        self.watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Report (and log) every watched dispatch past its deadline at `now`.
    pub fn sweep(&self, now: Instant) -> Vec<BlockedEvent> {
        let mut blocked: Vec<BlockedEvent> = self
            .watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|w| now > w.deadline)
            .map(|w| BlockedEvent {
                event_id: w.event_id,
                elapsed_ms: now.saturating_duration_since(w.started_at).as_millis() as u64,
            })
            .collect();
        blocked.sort_by(|a, b| b.elapsed_ms.cmp(&a.elapsed_ms));

        for b in &blocked {
            warn!(
                event_id = %b.event_id,
                elapsed_ms = b.elapsed_ms,
                threshold_ms = self.threshold.as_millis() as u64,
                "event handler blocked"
            );
        }
        blocked
    }

    /// Sweep every `interval` on a background thread.
    pub fn spawn(self: &Arc<Self>, name: &str, interval: Duration) -> WatchdogHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let checker = Arc::clone(self);
        let thread_name = format!("{name}-watchdog");

        let join = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                info!(watchdog = %thread_name, "blocked event checker started");
                loop {
                    match shutdown_rx.recv_timeout(interval) {
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            checker.sweep(Instant::now());
                        }
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .expect("failed to spawn watchdog thread");

        WatchdogHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

/// Handle to stop the watchdog thread.
#[derive(Debug)]
pub struct WatchdogHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WatchdogHandle {
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}
