//! Pipeline configuration.
//!
//! Plain structs with defaults and `with_*` builders. `from_env` reads `EVENTBUS_*`
//! variables; `from_lookup` takes the lookup explicitly so parsing is testable without
//! touching the process environment.

use std::str::FromStr;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use eventbus_events::QueueCapacity;

const DEFAULT_FETCH_PERIOD_MS: i64 = 1000;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Parse { key: String, value: String },

    #[error("{key} must be greater than zero")]
    Zero { key: &'static str },

    #[error("{key} must be within (0, 1], got {value}")]
    RatioOutOfRange { key: &'static str, value: f64 },

    #[error("low watermark ratio {low} exceeds high watermark ratio {high}")]
    InvertedWatermarks { low: f64, high: f64 },
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| ConfigError::Parse {
            key: key.to_string(),
            value: raw,
        }),
    }
}

/// Producer pipeline settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerConfig {
    /// Name for logging and thread names.
    pub name: String,
    /// Ordering-queue depth above which non-resent sends are throttled.
    pub max_quota: usize,
    /// Retry scheduler period.
    pub fetch_period: Duration,
    /// Events pulled from the repository per retry tick.
    pub fetch_count: usize,
    /// Bounded wait used by `close`.
    pub shutdown_timeout: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            name: "eventbus-producer".to_string(),
            max_quota: 10_000,
            fetch_period: Duration::from_millis(DEFAULT_FETCH_PERIOD_MS as u64),
            fetch_count: 10,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl ProducerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_quota(mut self, max_quota: usize) -> Self {
        self.max_quota = max_quota;
        self
    }

    /// Retry period in milliseconds; values <= 0 fall back to 1000.
    pub fn with_fetch_period_ms(mut self, ms: i64) -> Self {
        let ms = if ms <= 0 { DEFAULT_FETCH_PERIOD_MS } else { ms };
        self.fetch_period = Duration::from_millis(ms as u64);
        self
    }

    pub fn with_fetch_count(mut self, fetch_count: usize) -> Self {
        self.fetch_count = fetch_count.max(1);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(quota) = parse(&lookup, "EVENTBUS_PRODUCER_MAX_QUOTA")? {
            config = config.with_max_quota(quota);
        }
        if let Some(ms) = parse(&lookup, "EVENTBUS_PRODUCER_FETCH_PERIOD_MS")? {
            config = config.with_fetch_period_ms(ms);
        }
        if let Some(count) = parse::<usize>(&lookup, "EVENTBUS_PRODUCER_FETCH_COUNT")? {
            if count == 0 {
                return Err(ConfigError::Zero {
                    key: "EVENTBUS_PRODUCER_FETCH_COUNT",
                });
            }
            config = config.with_fetch_count(count);
        }
        Ok(config)
    }
}

/// Consumer pipeline settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerConfig {
    pub name: String,
    /// Fixed number of dispatch workers.
    pub worker_pool_size: usize,
    /// Intake queue capacity; drives the backpressure watermarks.
    pub max_quota: usize,
    /// Stuck-handler threshold in milliseconds; <= 0 disables the watchdog.
    pub blocked_threshold_ms: i64,
    /// Watchdog sweep period; defaults to the threshold.
    pub watchdog_interval: Option<Duration>,
    pub high_watermark_ratio: f64,
    pub low_watermark_ratio: f64,
    /// Upper bound of one transport poll.
    pub poll_timeout: Duration,
    /// Bounded wait used by `close`.
    pub shutdown_timeout: Duration,
    /// Period of the repository poller; `None` disables it.
    pub consume_fetch_period: Option<Duration>,
    pub consume_fetch_count: usize,
}

fn default_worker_pool_size() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get()) * 2
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            name: "eventbus-consumer".to_string(),
            worker_pool_size: default_worker_pool_size(),
            max_quota: 10_000,
            blocked_threshold_ms: 1000,
            watchdog_interval: None,
            high_watermark_ratio: 1.0,
            low_watermark_ratio: 0.5,
            poll_timeout: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(5),
            consume_fetch_period: None,
            consume_fetch_count: 10,
        }
    }
}

impl ConsumerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    pub fn with_max_quota(mut self, max_quota: usize) -> Self {
        self.max_quota = max_quota;
        self
    }

    pub fn with_blocked_threshold_ms(mut self, ms: i64) -> Self {
        self.blocked_threshold_ms = ms;
        self
    }

    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = Some(interval);
        self
    }

    pub fn with_watermarks(mut self, high_ratio: f64, low_ratio: f64) -> Self {
        self.high_watermark_ratio = high_ratio;
        self.low_watermark_ratio = low_ratio;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_consume_fetch(mut self, period: Duration, count: usize) -> Self {
        self.consume_fetch_period = Some(period);
        self.consume_fetch_count = count.max(1);
        self
    }

    /// `None` when the watchdog is disabled.
    pub fn blocked_threshold(&self) -> Option<Duration> {
        (self.blocked_threshold_ms > 0).then(|| Duration::from_millis(self.blocked_threshold_ms as u64))
    }

    pub fn queue_capacity(&self) -> QueueCapacity {
        QueueCapacity::new(self.max_quota)
            .with_ratios(self.high_watermark_ratio, self.low_watermark_ratio)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool_size == 0 {
            return Err(ConfigError::Zero {
                key: "worker_pool_size",
            });
        }
        if self.max_quota == 0 {
            return Err(ConfigError::Zero { key: "max_quota" });
        }
        for (key, value) in [
            ("high_watermark_ratio", self.high_watermark_ratio),
            ("low_watermark_ratio", self.low_watermark_ratio),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::RatioOutOfRange { key, value });
            }
        }
        if self.low_watermark_ratio > self.high_watermark_ratio {
            return Err(ConfigError::InvertedWatermarks {
                low: self.low_watermark_ratio,
                high: self.high_watermark_ratio,
            });
        }
        Ok(())
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(workers) = parse(&lookup, "EVENTBUS_CONSUMER_WORKERS")? {
            config.worker_pool_size = workers;
        }
        if let Some(quota) = parse(&lookup, "EVENTBUS_CONSUMER_MAX_QUOTA")? {
            config.max_quota = quota;
        }
        if let Some(ms) = parse(&lookup, "EVENTBUS_CONSUMER_BLOCKED_MS")? {
            config.blocked_threshold_ms = ms;
        }
        if let Some(high) = parse(&lookup, "EVENTBUS_CONSUMER_HIGH_WATERMARK")? {
            config.high_watermark_ratio = high;
        }
        if let Some(low) = parse(&lookup, "EVENTBUS_CONSUMER_LOW_WATERMARK")? {
            config.low_watermark_ratio = low;
        }
        config.validate()?;
        Ok(config)
    }
}
