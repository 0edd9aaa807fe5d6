//! Job-level error taxonomy.

use thiserror::Error;

use quire_core::{DomainError, JobId, OwnerId};

use crate::kv::KvError;

pub type JobResult<T> = Result<T, JobError>;

/// Errors surfaced by the job state store, orchestrator and lifecycle API.
///
/// Per-unit executor failures never appear here: they are retried inside the
/// unit task and, when exhausted, simply leave the unit outstanding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// A different job already holds the owner's slot.
    #[error("owner {owner} already has an active job ({active})")]
    Conflict { owner: OwnerId, active: JobId },

    /// Another owner is already running the same job.
    #[error("job {job_id} is already being processed for {holder}")]
    Held { job_id: JobId, holder: OwnerId },

    /// Required input is missing or malformed; no state was created.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The durable store failed; the operation was aborted.
    #[error(transparent)]
    StoreUnavailable(#[from] KvError),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job {job_id} is not owned by {owner}")]
    NotOwner { job_id: JobId, owner: OwnerId },

    /// `finish` was requested while units are still outstanding.
    #[error("job {job_id} still has {outstanding} outstanding units")]
    IncompleteJob { job_id: JobId, outstanding: usize },

    /// The job left the running state underneath the caller.
    #[error("job {job_id} is not running")]
    NotRunning { job_id: JobId },
}

impl From<DomainError> for JobError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Validation(msg) => JobError::Validation(msg),
            other => JobError::Validation(other.to_string()),
        }
    }
}

impl JobError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether a caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::StoreUnavailable(KvError::Unavailable(_)))
    }
}
