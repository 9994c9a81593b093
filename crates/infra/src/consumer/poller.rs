//! Repository-driven consumption: re-dispatch recorded events that never finished.

use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use eventbus_core::RepositoryError;
use eventbus_events::ConsumerRepository;

use super::{Consumer, Intake};

/// Periodically loads non-terminal events from a [`ConsumerRepository`] and hands the
/// ones not already in flight to the consumer.
pub struct RepositoryPoller {
    consumer: Consumer,
    repository: Arc<dyn ConsumerRepository>,
    fetch_count: usize,
}

impl RepositoryPoller {
    pub fn new(
        consumer: Consumer,
        repository: Arc<dyn ConsumerRepository>,
        fetch_count: usize,
    ) -> Self {
        Self {
            consumer,
            repository,
            fetch_count,
        }
    }

    /// One fetch; returns the number of events enqueued.
    pub fn poll_once(&self) -> Result<usize, RepositoryError> {
        let waiting = self.repository.waiting_for_consume(self.fetch_count)?;
        let mut enqueued = 0;
        for event in waiting {
            if self.consumer.is_in_flight(event.id()) {
                continue;
            }
            match self.consumer.accept_stored(event) {
                Ok(Intake::Enqueued) => enqueued += 1,
                Ok(Intake::Duplicate) => {}
                Err(err) => {
                    debug!(error = %err, "consumer closed, poll abandoned");
                    break;
                }
            }
        }
        Ok(enqueued)
    }

    pub fn spawn(self, period: Duration) -> PollerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let name = format!("{}-poller", self.consumer.config().name);

        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                info!(poller = %name, period_ms = period.as_millis() as u64, "repository poller started");
                loop {
                    match shutdown_rx.recv_timeout(period) {
                        Err(mpsc::RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                    if self.consumer.is_closed() {
                        break;
                    }
                    match self.poll_once() {
                        Ok(0) => {}
                        Ok(enqueued) => debug!(poller = %name, enqueued, "stored events enqueued"),
                        Err(err) => warn!(poller = %name, error = %err, "failed to load stored events"),
                    }
                }
                info!(poller = %name, "repository poller stopped");
            })
            .expect("failed to spawn repository poller thread");

        PollerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

/// Handle to stop a spawned [`RepositoryPoller`].
#[derive(Debug)]
pub struct PollerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl PollerHandle {
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}
