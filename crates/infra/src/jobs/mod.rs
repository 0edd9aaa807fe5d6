//! Resumable job execution.
//!
//! ## Components
//!
//! - `JobStateStore`: durable per-job state over a [`KeyValueStore`](crate::kv::KeyValueStore)
//! - `UnitExecutor`: the injected worker that processes one unit
//! - `JobOrchestrator`: drives outstanding units in rounds with retry and backoff

pub mod executor;
pub mod orchestrator;
pub mod store;
pub mod types;

pub use executor::{ExecutionContext, ExecutionError, UnitExecutor};
pub use orchestrator::{DEFAULT_MAX_ROUNDS, JobOrchestrator, OrchestratorConfig, RunOutcome};
pub use store::{DEFAULT_KEY_PREFIX, JobStateStore};
pub use types::{BackoffStrategy, JobProgress, JobStatus, LastJob, RetryPolicy};
