//! Tracing, logging, metrics (shared setup).

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, layers).
pub mod tracing;

/// Pipeline metrics sinks.
pub mod metrics;

pub use self::tracing::{LogFormat, init_for_tests, init_with};
pub use metrics::{InMemoryMetrics, MetricsSink, MetricsSnapshot, NoopMetrics};
