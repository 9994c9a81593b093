//! Counter of outstanding work with a bounded wait for it to drain.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Number of submitted-but-unfinished units of work.
///
/// Incremented on submission, decremented when the unit finishes (successfully or not).
/// `wait_idle` lets a shutdown path wait for the count to reach zero with a deadline.
#[derive(Debug, Default)]
pub struct PendingCounter {
    count: Mutex<usize>,
    idle: Condvar,
}

impl PendingCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    /// Returns the count after decrementing.
    pub fn decrement(&self) -> usize {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
        *count
    }

    pub fn get(&self) -> usize {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the count is zero or `timeout` elapses; returns the remaining count.
    pub fn wait_idle(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = self
                .idle
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            count = guard;
        }
        *count
    }
}
