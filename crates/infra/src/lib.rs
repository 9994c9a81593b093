//! Event bus pipelines: producer admission and retry, consumer dispatch, offset commits.

pub mod config;
pub mod consumer;
pub mod offsets;
pub mod producer;

pub use config::{ConfigError, ConsumerConfig, ProducerConfig};
pub use consumer::{
    BlockedEvent, BlockedEventChecker, Blacklist, Consumer, ConsumerBuilder, Intake,
    PollerHandle, ReadLoop, ReadLoopHandle, ReadLoopStats, RepositoryPoller,
};
pub use offsets::{CommitReport, OffsetCommitTracker};
pub use producer::{Producer, ProducerBuilder, RetryScheduler};

#[cfg(test)]
mod test_support {
    use std::thread;
    use std::time::{Duration, Instant};

    /// Poll `condition` every few milliseconds for up to five seconds.
    pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }
}

#[cfg(test)]
mod integration_tests;
