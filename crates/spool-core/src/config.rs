//! Queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{DEFAULT_MAX_RETRIES, TaskKind};
use crate::error::QueueError;

/// Top-level configuration for a [`crate::TaskQueue`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use spool_core::QueueConfig;
///
/// let config = QueueConfig::default()
///     .with_workers(4)
///     .with_capacity(256)
///     .with_shutdown_timeout(Duration::from_secs(10));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of worker tasks (the concurrency ceiling).
    pub workers: usize,

    /// Capacity of the distribution channel seen by producers.
    pub capacity: usize,

    /// Retry ceiling applied to first-time submissions.
    pub max_retries: u32,

    /// How long `shutdown` waits for in-flight work before aborting it.
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,

    /// Simulated latencies for the built-in handlers.
    pub latency: LatencyProfile,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            capacity: 100,
            max_retries: DEFAULT_MAX_RETRIES,
            shutdown_timeout: Duration::from_secs(5),
            latency: LatencyProfile::default(),
        }
    }
}

impl QueueConfig {
    /// Read overrides from the environment, falling back to defaults:
    /// - `SPOOL_WORKERS`
    /// - `SPOOL_CAPACITY`
    /// - `SPOOL_MAX_RETRIES`
    /// - `SPOOL_SHUTDOWN_TIMEOUT_MS`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            workers: env_parse("SPOOL_WORKERS").unwrap_or(defaults.workers),
            capacity: env_parse("SPOOL_CAPACITY").unwrap_or(defaults.capacity),
            max_retries: env_parse("SPOOL_MAX_RETRIES").unwrap_or(defaults.max_retries),
            shutdown_timeout: env_parse("SPOOL_SHUTDOWN_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.shutdown_timeout),
            latency: defaults.latency,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_latency(mut self, latency: LatencyProfile) -> Self {
        self.latency = latency;
        self
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.workers == 0 {
            return Err(QueueError::InvalidConfig("workers must be at least 1".into()));
        }
        if self.capacity == 0 {
            return Err(QueueError::InvalidConfig("capacity must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.latency.fail_success_rate) {
            return Err(QueueError::InvalidConfig(
                "fail_success_rate must be within 0.0..=1.0".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// How long each built-in task type keeps a worker busy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LatencyProfile {
    #[serde(with = "duration_millis")]
    pub email: Duration,
    #[serde(with = "duration_millis")]
    pub report: Duration,
    #[serde(with = "duration_millis")]
    pub data_cleanup: Duration,
    #[serde(with = "duration_millis")]
    pub sms: Duration,
    #[serde(with = "duration_millis")]
    pub newsletter: Duration,
    #[serde(with = "duration_millis")]
    pub takes_long: Duration,
    #[serde(with = "duration_millis")]
    pub undefined: Duration,

    /// `fail` tasks that win the draw.
    #[serde(with = "duration_millis")]
    pub fail_success: Duration,

    /// `fail` tasks that lose the draw, and every `fail-absolute` attempt.
    #[serde(with = "duration_millis")]
    pub failure: Duration,

    /// Probability that a `fail` attempt succeeds.
    pub fail_success_rate: f64,
}

impl Default for LatencyProfile {
    fn default() -> Self {
        Self {
            email: Duration::from_millis(2000),
            report: Duration::from_millis(5000),
            data_cleanup: Duration::from_millis(3000),
            sms: Duration::from_millis(1000),
            newsletter: Duration::from_millis(4000),
            takes_long: Duration::from_millis(10_000),
            undefined: Duration::from_millis(2000),
            fail_success: Duration::from_millis(2000),
            failure: Duration::from_millis(1000),
            fail_success_rate: 0.25,
        }
    }
}

impl LatencyProfile {
    /// Latency of a kind that always completes. `None` for the failing kinds,
    /// whose latency depends on the outcome.
    pub fn work_latency(&self, kind: &TaskKind) -> Option<Duration> {
        match kind {
            TaskKind::Email => Some(self.email),
            TaskKind::Report => Some(self.report),
            TaskKind::DataCleanup => Some(self.data_cleanup),
            TaskKind::Sms => Some(self.sms),
            TaskKind::Newsletter => Some(self.newsletter),
            TaskKind::TakesLong => Some(self.takes_long),
            TaskKind::Undefined(_) => Some(self.undefined),
            TaskKind::Fail | TaskKind::FailAbsolute => None,
        }
    }

    pub fn with_fail_success_rate(mut self, rate: f64) -> Self {
        self.fail_success_rate = rate;
        self
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
