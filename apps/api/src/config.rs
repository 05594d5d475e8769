use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::batch::{BackoffPolicy, BatchConfig};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic_api_key: String,
    pub port: u16,
    pub rust_log: String,
    pub max_file_size_mb: u64,
    /// How long a finished batch stays queryable before it is evicted.
    pub batch_retention: Duration,
    /// Defaults for every submitted batch; requests may override per field.
    pub batch_defaults: BatchConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let batch_defaults = BatchConfig {
            batch_size: optional_env("BATCH_SIZE", 10)?,
            concurrency: optional_env("MAX_CONCURRENT_REQUESTS", 5)?,
            rate_limit_interval: secs_env("RATE_LIMIT_DELAY_SECS", 1.0)?,
            max_retries: optional_env("MAX_RETRIES", 3)?,
            job_timeout: secs_env("JOB_TIMEOUT_SECS", 120.0)?,
            backoff: BackoffPolicy::Exponential {
                base: secs_env("BACKOFF_BASE_SECS", 1.0)?,
                max: secs_env("BACKOFF_MAX_SECS", 30.0)?,
            },
        };
        batch_defaults
            .validate()
            .context("Batch defaults from the environment are out of range")?;

        let retention_hours: u64 = optional_env("BATCH_RETENTION_HOURS", 24)?;
        anyhow::ensure!(retention_hours > 0, "BATCH_RETENTION_HOURS must be at least 1");

        Ok(Config {
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            port: optional_env("PORT", 8080).context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            max_file_size_mb: optional_env("MAX_FILE_SIZE_MB", 10)?,
            batch_retention: Duration::from_secs(retention_hours * 60 * 60),
            batch_defaults,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}

fn secs_env(key: &str, default: f64) -> Result<Duration> {
    let secs: f64 = optional_env(key, default)?;
    Duration::try_from_secs_f64(secs).with_context(|| {
        format!("Environment variable '{key}' must be a non-negative number of seconds")
    })
}
