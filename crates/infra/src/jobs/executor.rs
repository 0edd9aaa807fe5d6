//! The work executor seam.
//!
//! The orchestrator does not know what a unit of work *is* (translation,
//! extraction, ...). It hands each unit to a [`UnitExecutor`] that is
//! constructed by the process assembling the pipeline and injected at
//! construction time.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use quire_core::{JobId, Unit};

/// Failure of a single executor call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    /// Worth retrying after a backoff (timeouts, throttling, 5xx).
    #[error("transient execution failure: {0}")]
    Transient(String),
    /// Retrying right away will not help; the unit is left for the next round.
    #[error("execution rejected: {0}")]
    Rejected(String),
}

impl ExecutionError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ExecutionError::Transient(_))
    }
}

/// What an executor may know about the call it is serving.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub job_id: JobId,
    /// Position of the unit being executed
    pub index: usize,
    /// 1-indexed round of the orchestrator run
    pub round: u32,
    /// 1-indexed attempt within the round
    pub attempt: u32,
    /// Metadata recorded when the job was started
    pub metadata: Arc<BTreeMap<String, String>>,
}

/// Performs the actual work for one unit.
///
/// Calls may happen more than once for the same unit (at-least-once); the
/// store keeps the last result written.
#[async_trait]
pub trait UnitExecutor: Send + Sync {
    async fn execute(&self, unit: &Unit, ctx: &ExecutionContext) -> Result<String, ExecutionError>;
}

#[async_trait]
impl<T: UnitExecutor + ?Sized> UnitExecutor for Arc<T> {
    async fn execute(&self, unit: &Unit, ctx: &ExecutionContext) -> Result<String, ExecutionError> {
        (**self).execute(unit, ctx).await
    }
}
