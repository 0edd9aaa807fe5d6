//! Core job types and policies.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use quire_core::JobId;

/// Lifecycle status of a job as recorded in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Never started (nothing stored)
    None,
    /// Ownership claimed; units are being processed or awaiting resume
    Running,
    /// All units completed and the aggregate was handed out
    Done,
    /// Cancelled by its owner
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::None => "none",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Parse the stored representation; unknown values yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(JobStatus::None),
            "running" => Some(JobStatus::Running),
            "done" => Some(JobStatus::Done),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the wait between failed attempts grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Always `base_delay`
    Fixed,
    /// `base_delay * 2^(attempt / 2)`, so the wait doubles every second failure
    #[default]
    Exponential,
}

impl std::str::FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "exponential" => Ok(Self::Exponential),
            other => Err(format!("unknown backoff strategy {other:?} (expected fixed or exponential)")),
        }
    }
}

/// How often, and how patiently, one unit is retried within a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Executor calls per unit per round; values below 1 act as 1
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound on any single wait
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(5, Duration::from_secs(7), Duration::from_secs(60))
    }
}

impl RetryPolicy {
    /// One call, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Wait after failed attempt number `attempt` (1-indexed); zero for 0.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let factor = 2u32.checked_pow(attempt / 2).unwrap_or(u32::MAX);
                self.base_delay
                    .checked_mul(factor)
                    .map_or(self.max_delay, |d| d.min(self.max_delay))
            }
        }
    }

    /// Whether another executor call is allowed after `attempt` calls.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }
}

/// Progress of a job, always derived from the units actually stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub completed: usize,
    pub total: usize,
    pub running: bool,
    pub remaining: usize,
}

impl JobProgress {
    pub fn new(completed: usize, total: usize, running: bool) -> Self {
        Self {
            completed,
            total,
            running,
            remaining: total.saturating_sub(completed),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }
}

/// Rendered as `"{completed}/{total}"`.
impl std::fmt::Display for JobProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.completed, self.total)
    }
}

/// The most recent job started by an owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastJob {
    pub job_id: JobId,
    pub status: JobStatus,
    pub metadata: BTreeMap<String, String>,
}
