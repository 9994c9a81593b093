//! Single-consumer FIFO execution of a producer's send commands.
//!
//! The caller's thread only appends; one named background thread runs commands strictly
//! in append order, one at a time. `size()` is the depth used for admission throttling.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, warn};

use eventbus_core::SendError;

use crate::pending::PendingCounter;

/// A unit of work run on the ordering thread.
pub type Command = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// FIFO command executor with exactly one execution context.
///
/// A failing (or panicking) command is logged and does not prevent later commands from
/// running.
#[derive(Debug)]
pub struct OrderingQueue {
    name: String,
    sender: Mutex<Option<mpsc::Sender<Command>>>,
    depth: Arc<PendingCounter>,
    join: Mutex<Option<thread::JoinHandle<()>>>,
}

impl OrderingQueue {
    /// Spawn the execution thread.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<Command>();
        let depth = Arc::new(PendingCounter::new());

        let thread_name = name.clone();
        let thread_depth = depth.clone();
        let join = thread::Builder::new()
            .name(format!("{name}-ordering"))
            .spawn(move || run_commands(&thread_name, rx, &thread_depth))
            .expect("failed to spawn ordering queue thread");

        Self {
            name,
            sender: Mutex::new(Some(tx)),
            depth,
            join: Mutex::new(Some(join)),
        }
    }

    /// Append a command. Fails only once the queue has been closed.
    pub fn execute<F>(&self, command: F) -> Result<(), SendError>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = sender.as_ref() else {
            return Err(SendError::Closed);
        };

        self.depth.increment();
        if tx.send(Box::new(command)).is_err() {
            self.depth.decrement();
            return Err(SendError::Closed);
        }
        Ok(())
    }

    /// Commands appended but not yet finished.
    pub fn size(&self) -> usize {
        self.depth.get()
    }

    /// Shared depth counter, for callers that report depth after the queue is out of reach.
    pub fn depth_counter(&self) -> Arc<PendingCounter> {
        Arc::clone(&self.depth)
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Stop accepting commands and wait up to `timeout` for the queue to drain.
    ///
    /// Returns the number of commands still outstanding. The execution thread is joined
    /// only when it drained; otherwise it finishes the backlog and exits on its own.
    pub fn close(&self, timeout: Duration) -> usize {
        drop(
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let remaining = self.depth.wait_idle(timeout);
        if remaining > 0 {
            warn!(queue = %self.name, remaining, "ordering queue did not drain before timeout");
            return remaining;
        }

        let join = self.join.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(j) = join {
            // Closing from a command would otherwise join the current thread.
            if j.thread().id() != thread::current().id() {
                let _ = j.join();
            }
        }
        0
    }
}

fn run_commands(name: &str, rx: mpsc::Receiver<Command>, depth: &PendingCounter) {
    debug!(queue = name, "ordering queue started");

    for command in rx {
        match panic::catch_unwind(AssertUnwindSafe(command)) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(queue = name, error = ?err, "ordering queue command failed"),
            Err(_) => error!(queue = name, "ordering queue command panicked"),
        }
        depth.decrement();
    }

    debug!(queue = name, "ordering queue stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Barrier;

    #[test]
    fn failing_command_does_not_block_the_next() {
        let queue = OrderingQueue::new("test");
        let ran = Arc::new(Mutex::new(Vec::new()));

        queue.execute(|| anyhow::bail!("boom")).unwrap();
        queue.execute(|| panic!("worse")).unwrap();
        let r = ran.clone();
        queue
            .execute(move || {
                r.lock().unwrap().push(3);
                Ok(())
            })
            .unwrap();

        assert_eq!(queue.close(Duration::from_secs(5)), 0);
        assert_eq!(*ran.lock().unwrap(), vec![3]);
    }

    #[test]
    fn size_counts_unfinished_commands() {
        let queue = OrderingQueue::new("test");
        let gate = Arc::new(Barrier::new(2));

        let g = gate.clone();
        queue
            .execute(move || {
                g.wait();
                Ok(())
            })
            .unwrap();
        queue.execute(|| Ok(())).unwrap();

        assert_eq!(queue.size(), 2);
        gate.wait();
        assert_eq!(queue.close(Duration::from_secs(5)), 0);
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn closed_queue_rejects_commands() {
        let queue = OrderingQueue::new("test");
        assert_eq!(queue.close(Duration::from_secs(1)), 0);
        assert!(queue.is_closed());
        assert_eq!(queue.execute(|| Ok(())), Err(SendError::Closed));
    }

    #[test]
    fn close_reports_backlog_on_timeout() {
        let queue = OrderingQueue::new("test");
        let gate = Arc::new(Barrier::new(2));

        let g = gate.clone();
        queue
            .execute(move || {
                g.wait();
                Ok(())
            })
            .unwrap();
        queue.execute(|| Ok(())).unwrap();

        assert_eq!(queue.close(Duration::from_millis(20)), 2);
        gate.wait();
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn commands_run_in_append_order(values in proptest::collection::vec(any::<u32>(), 0..64)) {
            let queue = OrderingQueue::new("prop");
            let seen = Arc::new(Mutex::new(Vec::new()));

            for v in values.iter().copied() {
                let seen = seen.clone();
                queue
                    .execute(move || {
                        seen.lock().unwrap().push(v);
                        Ok(())
                    })
                    .unwrap();
            }

            prop_assert_eq!(queue.close(Duration::from_secs(5)), 0);
            prop_assert_eq!(&*seen.lock().unwrap(), &values);
        }
    }
}
