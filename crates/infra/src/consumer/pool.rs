use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, warn};

use eventbus_core::ConsumeError;
use eventbus_events::{EventQueue, PendingCounter};

/// What a dispatch unit did with its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnitOutcome {
    Done,
    /// The queue was interrupted; the worker stops.
    Interrupted,
}

/// A dispatch unit; receives the worker's name.
pub(crate) type Job = Box<dyn FnOnce(&str) -> UnitOutcome + Send + 'static>;

/// Fixed set of named worker threads pulling jobs from one shared channel.
#[derive(Debug)]
pub(crate) struct WorkerPool {
    name: String,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    pending: Arc<PendingCounter>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl WorkerPool {
    pub(crate) fn new(name: &str, size: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let pending = Arc::new(PendingCounter::new());

        let workers = (0..size)
            .map(|i| {
                let worker = format!("{name}-worker-{i}");
                let rx = rx.clone();
                let pending = pending.clone();
                thread::Builder::new()
                    .name(worker.clone())
                    .spawn(move || worker_loop(&worker, &rx, &pending))
                    .expect("failed to spawn consumer worker thread")
            })
            .collect();

        Self {
            name: name.to_string(),
            sender: Mutex::new(Some(tx)),
            pending,
            workers: Mutex::new(workers),
        }
    }

    pub(crate) fn submit(&self, job: Job) -> Result<(), ConsumeError> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = sender.as_ref().ok_or(ConsumeError::Closed)?;
        self.pending.increment();
        if tx.send(job).is_err() {
            self.pending.decrement();
            return Err(ConsumeError::Closed);
        }
        Ok(())
    }

    /// Units submitted but not finished.
    pub(crate) fn pending(&self) -> usize {
        self.pending.get()
    }

    /// Stop accepting units, wait up to `timeout` for the submitted ones, then interrupt
    /// the queue so blocked workers exit. Returns the units left unfinished.
    pub(crate) fn shutdown(&self, timeout: Duration, queue: &dyn EventQueue) -> usize {
        drop(
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let remaining = self.pending.wait_idle(timeout);
        queue.interrupt();

        if remaining > 0 {
            warn!(pool = %self.name, remaining, "worker pool did not drain before timeout");
            return remaining;
        }

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() != current {
                let _ = worker.join();
            }
        }
        0
    }
}

fn worker_loop(worker: &str, rx: &Mutex<mpsc::Receiver<Job>>, pending: &PendingCounter) {
    debug!(worker, "consumer worker started");

    loop {
        let job = rx.lock().unwrap_or_else(PoisonError::into_inner).recv();
        let Ok(job) = job else {
            break;
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(worker)));
        pending.decrement();
        match outcome {
            Ok(UnitOutcome::Done) => {}
            Ok(UnitOutcome::Interrupted) => break,
            Err(_) => error!(worker, "dispatch unit panicked"),
        }
    }

    debug!(worker, "consumer worker stopped");
}
