use std::ops::RangeInclusive;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch::job::JobSource;

pub const BATCH_SIZE_BOUNDS: RangeInclusive<usize> = 1..=20;
pub const CONCURRENCY_BOUNDS: RangeInclusive<usize> = 1..=10;
pub const RATE_LIMIT_BOUNDS: RangeInclusive<Duration> =
    Duration::from_millis(500)..=Duration::from_secs(5);
pub const MAX_RETRIES_BOUNDS: RangeInclusive<u32> = 0..=10;
pub const JOB_TIMEOUT_BOUNDS: RangeInclusive<Duration> =
    Duration::from_secs(1)..=Duration::from_secs(600);
pub const MAX_BACKOFF_DELAY: Duration = Duration::from_secs(300);

/// Delay before a job that failed transiently becomes eligible again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum BackoffPolicy {
    Fixed {
        #[serde(with = "secs_f64")]
        delay: Duration,
    },
    /// `base * 2^(attempt - 1)`, capped at `max`.
    Exponential {
        #[serde(with = "secs_f64")]
        base: Duration,
        #[serde(with = "secs_f64")]
        max: Duration,
    },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Delay after the `attempt`-th analysis attempt failed (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed { delay } => delay,
            Self::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << exponent).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Jobs dispatched per wave.
    pub batch_size: usize,
    pub concurrency: usize,
    #[serde(with = "secs_f64")]
    pub rate_limit_interval: Duration,
    pub max_retries: u32,
    #[serde(with = "secs_f64")]
    pub job_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            concurrency: 5,
            rate_limit_interval: Duration::from_secs(1),
            max_retries: 3,
            job_timeout: Duration::from_secs(120),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("batch contains no files")]
    EmptyBatch,

    #[error("{field} = {value} is outside the allowed range {allowed}")]
    OutOfBounds {
        field: &'static str,
        value: String,
        allowed: String,
    },
}

impl BatchConfig {
    /// Rejects any out-of-range value. Values are never clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check("batch_size", self.batch_size, &BATCH_SIZE_BOUNDS)?;
        check("concurrency", self.concurrency, &CONCURRENCY_BOUNDS)?;
        check_duration(
            "rate_limit_interval",
            self.rate_limit_interval,
            &RATE_LIMIT_BOUNDS,
        )?;
        check("max_retries", self.max_retries, &MAX_RETRIES_BOUNDS)?;
        check_duration("job_timeout", self.job_timeout, &JOB_TIMEOUT_BOUNDS)?;

        let backoff_bounds = Duration::ZERO..=MAX_BACKOFF_DELAY;
        match self.backoff {
            BackoffPolicy::Fixed { delay } => {
                check_duration("backoff.delay", delay, &backoff_bounds)?
            }
            BackoffPolicy::Exponential { base, max } => {
                check_duration("backoff.base", base, &backoff_bounds)?;
                check_duration("backoff.max", max, &(base..=MAX_BACKOFF_DELAY))?;
            }
        }
        Ok(())
    }

    /// Upper bound on analysis attempts per job.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

fn check<T>(field: &'static str, value: T, bounds: &RangeInclusive<T>) -> Result<(), ConfigError>
where
    T: PartialOrd + std::fmt::Display,
{
    if bounds.contains(&value) {
        return Ok(());
    }
    Err(ConfigError::OutOfBounds {
        field,
        value: value.to_string(),
        allowed: format!("{}..={}", bounds.start(), bounds.end()),
    })
}

fn check_duration(
    field: &'static str,
    value: Duration,
    bounds: &RangeInclusive<Duration>,
) -> Result<(), ConfigError> {
    if bounds.contains(&value) {
        return Ok(());
    }
    Err(ConfigError::OutOfBounds {
        field,
        value: format!("{:?}", value),
        allowed: format!("{:?}..={:?}", bounds.start(), bounds.end()),
    })
}

/// An ordered set of files plus the configuration to process them with.
/// Immutable once built.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    sources: Vec<JobSource>,
    config: BatchConfig,
}

impl BatchRequest {
    pub fn new(sources: Vec<JobSource>, config: BatchConfig) -> Self {
        Self { sources, config }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::EmptyBatch);
        }
        self.config.validate()
    }

    pub(crate) fn into_parts(self) -> (Vec<JobSource>, BatchConfig) {
        (self.sources, self.config)
    }
}

pub(crate) mod secs_f64 {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
