//! Job orchestrator: drives a job's units through the executor in rounds.
//!
//! ## Rounds
//!
//! Each round asks the store which units are still outstanding. If none are,
//! the job is finished. Otherwise one task per outstanding unit is spawned;
//! every executor call inside a task is individually admitted by the
//! [`RateLimiter`]. The round ends when every task has settled.
//!
//! A failing unit is retried inside its task with backoff. When the task
//! gives up, the unit stays unrecorded and the next round selects it again;
//! there is no separate retry queue. After `max_rounds` the job is left
//! running with partial progress, and a later run resumes from exactly the
//! outstanding set.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};

use quire_core::{JobId, RunId, Unit};

use super::executor::{ExecutionContext, UnitExecutor};
use super::store::JobStateStore;
use super::types::{JobProgress, JobStatus, RetryPolicy};
use crate::error::{JobError, JobResult};
use crate::kv::KeyValueStore;
use crate::rate_limiter::RateLimiter;

/// Default number of rounds per run.
pub const DEFAULT_MAX_ROUNDS: u32 = 3;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every unit completed; results in index order.
    Completed(Vec<String>),
    /// Round cap reached with units outstanding. The job stays running.
    Stalled(JobProgress),
    /// The job was cancelled while the run was in progress.
    Cancelled,
}

/// Result of one unit task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitOutcome {
    Recorded,
    Deferred,
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on rounds per run
    pub max_rounds: u32,
    /// Per-unit retry policy within a round
    pub retry_policy: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

/// Shared state cloned into every unit task.
struct Shared<K, E> {
    store: JobStateStore<K>,
    executor: E,
    limiter: Arc<RateLimiter>,
    retry_policy: RetryPolicy,
}

pub struct JobOrchestrator<K, E> {
    shared: Arc<Shared<K, E>>,
    max_rounds: u32,
}

impl<K, E> Clone for JobOrchestrator<K, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            max_rounds: self.max_rounds,
        }
    }
}

impl<K, E> JobOrchestrator<K, E>
where
    K: KeyValueStore + 'static,
    E: UnitExecutor + 'static,
{
    pub fn new(
        store: JobStateStore<K>,
        executor: E,
        limiter: Arc<RateLimiter>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                executor,
                limiter,
                retry_policy: config.retry_policy,
            }),
            max_rounds: config.max_rounds.max(1),
        }
    }

    pub fn store(&self) -> &JobStateStore<K> {
        &self.shared.store
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.shared.limiter
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.shared.retry_policy
    }

    /// Drive a started job until it completes, stalls or is cancelled.
    ///
    /// `units` must be the job's full, ordered unit list, as many as were
    /// recorded at start; already recorded units are skipped, so calling this
    /// again after a crash resumes.
    pub async fn run(&self, job_id: &JobId, units: &[Unit]) -> JobResult<RunOutcome> {
        let run_id = RunId::new();
        let span = info_span!("job_run", job_id = %job_id, run_id = %run_id, units = units.len());
        self.run_rounds(job_id, units).instrument(span).await
    }

    async fn run_rounds(&self, job_id: &JobId, units: &[Unit]) -> JobResult<RunOutcome> {
        let store = &self.shared.store;
        // The stored total is fixed at start; the caller's units must match it.
        let Some(total) = store.total_units(job_id).await? else {
            return Err(JobError::NotRunning {
                job_id: job_id.clone(),
            });
        };
        if units.len() != total {
            return Err(JobError::validation(format!(
                "job {job_id} was started with {total} units, got {}",
                units.len()
            )));
        }
        if let Some(misplaced) = units.iter().enumerate().find(|(i, u)| u.index != *i) {
            return Err(JobError::validation(format!(
                "unit at position {} has index {}",
                misplaced.0, misplaced.1.index
            )));
        }
        let metadata = Arc::new(store.metadata(job_id).await?);

        for round in 1..=self.max_rounds + 1 {
            match store.status(job_id).await? {
                JobStatus::Running => {}
                JobStatus::Cancelled => {
                    info!(round, "job cancelled; stopping");
                    return Ok(RunOutcome::Cancelled);
                }
                JobStatus::None | JobStatus::Done => {
                    return Err(JobError::NotRunning {
                        job_id: job_id.clone(),
                    });
                }
            }

            let outstanding = store.outstanding(job_id, total).await?;
            if outstanding.is_empty() {
                let results = store.finish(job_id).await?;
                return Ok(RunOutcome::Completed(results));
            }

            if round > self.max_rounds {
                let progress = store.progress(job_id).await?;
                warn!(
                    rounds = self.max_rounds,
                    progress = %progress,
                    "round cap reached with units outstanding"
                );
                return Ok(RunOutcome::Stalled(progress));
            }

            info!(round, outstanding = outstanding.len(), "starting round");

            let mut tasks = JoinSet::new();
            for index in outstanding {
                let shared = self.shared.clone();
                let unit = units[index].clone();
                let ctx = ExecutionContext {
                    job_id: job_id.clone(),
                    index,
                    round,
                    attempt: 0,
                    metadata: metadata.clone(),
                };
                tasks.spawn(async move { shared.process_unit(unit, ctx).await }.in_current_span());
            }

            let mut recorded = 0usize;
            let mut deferred = 0usize;
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(UnitOutcome::Recorded)) => recorded += 1,
                    Ok(Ok(UnitOutcome::Deferred)) => deferred += 1,
                    Ok(Err(e)) => {
                        // The store is the source of truth; without it no
                        // progress can be trusted.
                        error!(error = %e, "store failure during round; aborting run");
                        tasks.abort_all();
                        return Err(e);
                    }
                    Err(e) => {
                        error!(error = %e, "unit task panicked");
                        deferred += 1;
                    }
                }
            }

            info!(round, recorded, deferred, "round settled");
        }

        // The final loop iteration always returns.
        let progress = store.progress(job_id).await?;
        Ok(RunOutcome::Stalled(progress))
    }
}

impl<K, E> Shared<K, E>
where
    K: KeyValueStore,
    E: UnitExecutor,
{
    /// Run one unit with retries. Executor failures are absorbed; only store
    /// failures are returned.
    async fn process_unit(&self, unit: Unit, mut ctx: ExecutionContext) -> JobResult<UnitOutcome> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            ctx.attempt = attempt;

            self.limiter.acquire().await;

            match self.executor.execute(&unit, &ctx).await {
                Ok(result) => {
                    let progress = self
                        .store
                        .record_unit(&ctx.job_id, unit.index, &result)
                        .await?;
                    debug!(index = unit.index, attempt, progress = %progress, "unit recorded");
                    return Ok(UnitOutcome::Recorded);
                }
                Err(e) if e.is_transient() && self.retry_policy.should_retry(attempt) => {
                    let delay = self.retry_policy.delay_for_attempt(attempt);
                    debug!(
                        index = unit.index,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "unit failed; backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(index = unit.index, attempt, error = %e, "unit deferred to next round");
                    return Ok(UnitOutcome::Deferred);
                }
            }
        }
    }
}
