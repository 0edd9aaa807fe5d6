//! Job lifecycle API: the facade an outer surface (HTTP, CLI) talks to.
//!
//! `submit` chunks the content, identifies the book from its first unit,
//! short-circuits on a cached result and otherwise runs the job to an
//! outcome. Calling `submit` again for a running job resumes it, provided
//! the content still splits into the same number of units.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use quire_core::{BookInfo, JobId, OwnerId, Unit, UnitCounter, split_into_units};

use crate::cache::ResultCache;
use crate::error::{JobError, JobResult};
use crate::jobs::{
    ExecutionError, JobOrchestrator, JobProgress, JobStateStore, JobStatus, RunOutcome,
    UnitExecutor,
};
use crate::kv::KeyValueStore;

/// Separator placed between unit results in the aggregate text.
pub const AGGREGATE_SEPARATOR: &str = "\n\n";

/// Identifies the book a document belongs to from a sample of it.
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    async fn extract(&self, sample: &str) -> Result<BookInfo, ExecutionError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A finished result already existed; no job was started.
    Cached {
        job_id: JobId,
        book: BookInfo,
        text: String,
    },
    Completed {
        job_id: JobId,
        book: BookInfo,
        text: String,
    },
    /// The run ended with units outstanding; submit again to resume.
    Stalled { job_id: JobId, progress: JobProgress },
    Cancelled { job_id: JobId },
}

impl SubmitOutcome {
    pub fn job_id(&self) -> &JobId {
        match self {
            SubmitOutcome::Cached { job_id, .. }
            | SubmitOutcome::Completed { job_id, .. }
            | SubmitOutcome::Stalled { job_id, .. }
            | SubmitOutcome::Cancelled { job_id } => job_id,
        }
    }

    /// The aggregate text, if the job has one.
    pub fn text(&self) -> Option<&str> {
        match self {
            SubmitOutcome::Cached { text, .. } | SubmitOutcome::Completed { text, .. } => {
                Some(text)
            }
            _ => None,
        }
    }
}

/// The last job an owner started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub job_id: JobId,
    pub status: JobStatus,
    pub book: BookInfo,
    /// `None` when the job's record is incomplete
    pub progress: Option<JobProgress>,
}

pub struct JobLifecycle<K, E, C> {
    orchestrator: JobOrchestrator<K, E>,
    cache: C,
    counter: Arc<dyn UnitCounter>,
    max_unit_size: usize,
}

impl<K, E, C> JobLifecycle<K, E, C>
where
    K: KeyValueStore + 'static,
    E: UnitExecutor + 'static,
    C: ResultCache,
{
    pub fn new(
        orchestrator: JobOrchestrator<K, E>,
        cache: C,
        counter: Arc<dyn UnitCounter>,
        max_unit_size: usize,
    ) -> Self {
        Self {
            orchestrator,
            cache,
            counter,
            max_unit_size,
        }
    }

    pub fn store(&self) -> &JobStateStore<K> {
        self.orchestrator.store()
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Start (or resume) processing `content` for `owner_id`.
    #[instrument(skip(self, content, extractor), fields(owner = %owner_id, bytes = content.len()), err)]
    pub async fn submit(
        &self,
        owner_id: &OwnerId,
        content: &str,
        extractor: &dyn MetadataExtractor,
    ) -> JobResult<SubmitOutcome> {
        let units = Unit::enumerate(split_into_units(
            content,
            self.max_unit_size,
            self.counter.as_ref(),
        ));
        let Some(first) = units.first() else {
            return Err(JobError::validation("content has no text to process"));
        };

        let book = self.extract_metadata(extractor, &first.content).await?;
        book.validate()?;
        let job_id = book.job_id();

        match self.cache.lookup(&book) {
            Ok(Some(text)) => {
                info!(job_id = %job_id, "returning cached result");
                return Ok(SubmitOutcome::Cached { job_id, book, text });
            }
            Ok(None) => {}
            Err(e) => warn!(job_id = %job_id, error = %e, "result cache lookup failed"),
        }

        let store = self.store();
        if !store
            .start(owner_id, &job_id, &book.to_metadata(), units.len())
            .await?
        {
            return Err(self.explain_refused_start(owner_id, job_id).await?);
        }

        match self.orchestrator.run(&job_id, &units).await? {
            RunOutcome::Completed(results) => {
                let text = aggregate(&results);
                if let Err(e) = self.cache.store(&book, &text) {
                    warn!(job_id = %job_id, error = %e, "failed to cache result");
                }
                Ok(SubmitOutcome::Completed { job_id, book, text })
            }
            RunOutcome::Stalled(progress) => Ok(SubmitOutcome::Stalled { job_id, progress }),
            RunOutcome::Cancelled => Ok(SubmitOutcome::Cancelled { job_id }),
        }
    }

    /// Why `start` refused: the owner is busy with another job, or another
    /// owner is running this one.
    async fn explain_refused_start(&self, owner_id: &OwnerId, job_id: JobId) -> JobResult<JobError> {
        let store = self.store();
        if let Some(active) = store.active_job(owner_id).await? {
            if active != job_id {
                return Ok(JobError::Conflict {
                    owner: owner_id.clone(),
                    active,
                });
            }
        }
        Ok(match store.holder_of(&job_id).await? {
            Some(holder) if &holder != owner_id => JobError::Held { job_id, holder },
            _ => JobError::Conflict {
                owner: owner_id.clone(),
                active: job_id,
            },
        })
    }

    pub async fn progress(&self, job_id: &JobId) -> JobResult<JobProgress> {
        self.store().progress(job_id).await
    }

    pub async fn cancel(&self, job_id: &JobId, owner_id: &OwnerId) -> JobResult<()> {
        self.store().cancel(job_id, owner_id).await
    }

    pub async fn last(&self, owner_id: &OwnerId) -> JobResult<Option<JobSummary>> {
        let Some(last) = self.store().last_job(owner_id).await? else {
            return Ok(None);
        };
        let progress = match self.store().progress(&last.job_id).await {
            Ok(progress) => Some(progress),
            Err(JobError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        Ok(Some(JobSummary {
            book: BookInfo::from_metadata(&last.metadata),
            job_id: last.job_id,
            status: last.status,
            progress,
        }))
    }

    /// Extraction shares the admission window and retry policy with unit
    /// execution.
    async fn extract_metadata(
        &self,
        extractor: &dyn MetadataExtractor,
        sample: &str,
    ) -> JobResult<BookInfo> {
        let limiter = self.orchestrator.limiter();
        let policy = self.orchestrator.retry_policy();
        let mut attempt = 0;
        loop {
            attempt += 1;
            limiter.acquire().await;
            match extractor.extract(sample).await {
                Ok(book) => return Ok(book),
                Err(e) if e.is_transient() && policy.should_retry(attempt) => {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(attempt, error = %e, "metadata extraction failed; retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(JobError::validation(format!(
                        "could not identify the document: {e}"
                    )));
                }
            }
        }
    }
}

fn aggregate(results: &[String]) -> String {
    results
        .iter()
        .map(|r| r.trim())
        .collect::<Vec<_>>()
        .join(AGGREGATE_SEPARATOR)
}
