//! Pipeline configuration, read from `QUIRE_*` environment variables.
//!
//! Every setting has a default; unset variables fall back to it, malformed
//! ones are reported instead of silently ignored.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::jobs::{DEFAULT_KEY_PREFIX, DEFAULT_MAX_ROUNDS, OrchestratorConfig, RetryPolicy};
use crate::rate_limiter::RateLimiter;

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379/0";
pub const DEFAULT_MAX_CALLS: usize = 10;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_UNIT_SIZE: usize = 2000;
pub const DEFAULT_CACHE_DIR: &str = "translated_books_cache";
pub const DEFAULT_CACHE_CAPACITY: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub redis_url: String,
    pub key_prefix: String,
    /// Admission limit per window
    pub max_calls: usize,
    pub window: Duration,
    /// Unit budget per chunk, in the counter's units
    pub max_unit_size: usize,
    pub max_rounds: u32,
    pub retry_policy: RetryPolicy,
    pub cache_dir: PathBuf,
    pub cache_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            max_calls: DEFAULT_MAX_CALLS,
            window: DEFAULT_WINDOW,
            max_unit_size: DEFAULT_MAX_UNIT_SIZE,
            max_rounds: DEFAULT_MAX_ROUNDS,
            retry_policy: RetryPolicy::default(),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl PipelineConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let mut retry_policy = defaults.retry_policy.clone();
        retry_policy.max_attempts = parse_or(&lookup, "QUIRE_RETRY_MAX_ATTEMPTS", retry_policy.max_attempts)?;
        retry_policy.base_delay = Duration::from_millis(parse_or(
            &lookup,
            "QUIRE_RETRY_BASE_DELAY_MS",
            retry_policy.base_delay.as_millis() as u64,
        )?);
        retry_policy.max_delay = Duration::from_millis(parse_or(
            &lookup,
            "QUIRE_RETRY_MAX_DELAY_MS",
            retry_policy.max_delay.as_millis() as u64,
        )?);
        retry_policy.strategy = parse_or(&lookup, "QUIRE_RETRY_STRATEGY", retry_policy.strategy)?;

        Ok(Self {
            redis_url: lookup("QUIRE_REDIS_URL").unwrap_or(defaults.redis_url),
            key_prefix: lookup("QUIRE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            max_calls: parse_or(&lookup, "QUIRE_RATE_LIMIT_CALLS", defaults.max_calls)?,
            window: Duration::from_secs(parse_or(
                &lookup,
                "QUIRE_RATE_LIMIT_WINDOW_SECS",
                defaults.window.as_secs(),
            )?),
            max_unit_size: parse_or(&lookup, "QUIRE_MAX_UNIT_SIZE", defaults.max_unit_size)?,
            max_rounds: parse_or(&lookup, "QUIRE_MAX_ROUNDS", defaults.max_rounds)?,
            retry_policy,
            cache_dir: lookup("QUIRE_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            cache_capacity: parse_or(&lookup, "QUIRE_CACHE_CAPACITY", defaults.cache_capacity)?,
        })
    }

    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(self.max_calls, self.window))
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_max_rounds(self.max_rounds)
            .with_retry_policy(self.retry_policy.clone())
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
