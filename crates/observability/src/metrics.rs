//! Metrics sinks supplied explicitly to the pipelines.
//!
//! A pipeline receives one `Arc<dyn MetricsSink>` at construction; nothing is
//! discovered at runtime. Every hook has a no-op default so exporters only implement
//! what they report.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Receiver of pipeline measurements.
///
/// Hooks are called on hot paths (ordering-queue thread, transport callbacks, worker
/// threads) and must not block.
pub trait MetricsSink: Send + Sync + core::fmt::Debug {
    /// An event was admitted into the producer's ordering queue.
    fn send_enqueued(&self) {}

    /// A queued send command started executing.
    fn send_started(&self) {}

    /// The transport reported the outcome of a send.
    fn send_finished(&self, _succeeded: bool, _duration_secs: u64) {}

    /// An event was dropped because its TTL elapsed before transmission.
    fn send_expired(&self) {}

    /// Admission rejected an event because the ordering queue exceeded its quota.
    fn send_throttled(&self) {}

    /// A worker dequeued an event.
    fn consume_started(&self) {}

    /// A worker finished an event (handled, failed or skipped).
    fn consume_finished(&self, _duration: Duration) {}

    /// An event was not dispatched: duplicate, already consumed or blacklisted.
    fn consume_skipped(&self) {}

    /// Reading from the transport was paused by backpressure.
    fn read_paused(&self) {}

    /// Reading from the transport resumed.
    fn read_resumed(&self) {}
}

/// Default sink: discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

/// Point-in-time copy of [`InMemoryMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub send_enqueued: u64,
    pub send_started: u64,
    pub send_succeeded: u64,
    pub send_failed: u64,
    pub send_expired: u64,
    pub send_throttled: u64,
    pub send_duration_secs_total: u64,
    pub consume_started: u64,
    pub consume_finished: u64,
    pub consume_skipped: u64,
    pub consume_duration_ms_total: u64,
    pub read_paused: u64,
    pub read_resumed: u64,
}

/// Counter-based sink for tests, dev and simple stats endpoints.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    send_enqueued: AtomicU64,
    send_started: AtomicU64,
    send_succeeded: AtomicU64,
    send_failed: AtomicU64,
    send_expired: AtomicU64,
    send_throttled: AtomicU64,
    send_duration_secs_total: AtomicU64,
    consume_started: AtomicU64,
    consume_finished: AtomicU64,
    consume_skipped: AtomicU64,
    consume_duration_ms_total: AtomicU64,
    read_paused: AtomicU64,
    read_resumed: AtomicU64,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            send_enqueued: get(&self.send_enqueued),
            send_started: get(&self.send_started),
            send_succeeded: get(&self.send_succeeded),
            send_failed: get(&self.send_failed),
            send_expired: get(&self.send_expired),
            send_throttled: get(&self.send_throttled),
            send_duration_secs_total: get(&self.send_duration_secs_total),
            consume_started: get(&self.consume_started),
            consume_finished: get(&self.consume_finished),
            consume_skipped: get(&self.consume_skipped),
            consume_duration_ms_total: get(&self.consume_duration_ms_total),
            read_paused: get(&self.read_paused),
            read_resumed: get(&self.read_resumed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl MetricsSink for InMemoryMetrics {
    fn send_enqueued(&self) {
        bump(&self.send_enqueued);
    }

    fn send_started(&self) {
        bump(&self.send_started);
    }

    fn send_finished(&self, succeeded: bool, duration_secs: u64) {
        if succeeded {
            bump(&self.send_succeeded);
        } else {
            bump(&self.send_failed);
        }
        self.send_duration_secs_total
            .fetch_add(duration_secs, Ordering::Relaxed);
    }

    fn send_expired(&self) {
        bump(&self.send_expired);
    }

    fn send_throttled(&self) {
        bump(&self.send_throttled);
    }

    fn consume_started(&self) {
        bump(&self.consume_started);
    }

    fn consume_finished(&self, duration: Duration) {
        bump(&self.consume_finished);
        self.consume_duration_ms_total
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    fn consume_skipped(&self) {
        bump(&self.consume_skipped);
    }

    fn read_paused(&self) {
        bump(&self.read_paused);
    }

    fn read_resumed(&self) {
        bump(&self.read_resumed);
    }
}
