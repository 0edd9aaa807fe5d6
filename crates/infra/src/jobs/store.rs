//! Job state store: job lifecycle, ownership and per-unit results on top of
//! a [`KeyValueStore`].
//!
//! ## Key layout
//!
//! - `{p}:owner:{owner}:active_job`: ownership semaphore (job id)
//! - `{p}:owner:{owner}:last_job`: last job started by the owner
//! - `{p}:job:{id}:holder`: owner currently running the job (one at a time)
//! - `{p}:job:{id}:owner` / `:total` / `:status`: job record
//! - `{p}:job:{id}:meta`: hash of opaque metadata
//! - `{p}:job:{id}:units`: hash of unit index to result
//!
//! Progress is always recomputed from the stored unit fields; there is no
//! separately incremented counter that could drift under retries or crashes.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, instrument, warn};

use quire_core::{JobId, OwnerId};

use super::types::{JobProgress, JobStatus, LastJob};
use crate::error::{JobError, JobResult};
use crate::kv::{KeyValueStore, KvError};

/// Default namespace for every key written by the store.
pub const DEFAULT_KEY_PREFIX: &str = "quire";

#[derive(Debug, Clone)]
pub struct JobStateStore<K> {
    kv: K,
    prefix: String,
}

impl<K: KeyValueStore> JobStateStore<K> {
    pub fn new(kv: K) -> Self {
        Self::with_prefix(kv, DEFAULT_KEY_PREFIX)
    }

    pub fn with_prefix(kv: K, prefix: impl Into<String>) -> Self {
        Self {
            kv,
            prefix: prefix.into(),
        }
    }

    pub fn kv(&self) -> &K {
        &self.kv
    }

    pub fn semaphore_key(&self, owner_id: &OwnerId) -> String {
        format!("{}:owner:{}:active_job", self.prefix, owner_id)
    }

    fn last_job_key(&self, owner_id: &OwnerId) -> String {
        format!("{}:owner:{}:last_job", self.prefix, owner_id)
    }

    fn job_key(&self, job_id: &JobId, field: &str) -> String {
        format!("{}:job:{}:{}", self.prefix, job_id, field)
    }

    pub fn units_key(&self, job_id: &JobId) -> String {
        self.job_key(job_id, "units")
    }

    /// Claim the owner's slot for `job_id`.
    ///
    /// - the owner's slot holds another job: `false`, nothing is written
    /// - another owner is running `job_id`: `false`, nothing is left behind
    /// - the slot holds this job and it is running: `true`, nothing is rewritten
    /// - otherwise: claim the slot, record the job and return `true`
    ///
    /// A claim cut short by a store failure is rolled back when the store
    /// allows it; otherwise the next `start` of the same job completes it.
    #[instrument(skip(self, metadata), fields(owner = %owner_id, job_id = %job_id), err)]
    pub async fn start(
        &self,
        owner_id: &OwnerId,
        job_id: &JobId,
        metadata: &BTreeMap<String, String>,
        total_units: usize,
    ) -> JobResult<bool> {
        let semaphore = self.semaphore_key(owner_id);

        let mut held = self.kv.get(&semaphore).await?;
        if held.is_none() && !self.kv.set_if_absent(&semaphore, job_id.as_str()).await? {
            // A concurrent start won the slot between our read and write.
            held = Some(self.kv.get(&semaphore).await?.unwrap_or_default());
        }

        if let Some(active) = held {
            if active != job_id.as_str() {
                debug!(active, "owner slot held by another job");
                return Ok(false);
            }
            if self.status(job_id).await? == JobStatus::Running
                && self.owner_of(job_id).await?.as_ref() == Some(owner_id)
            {
                debug!("job already running; resuming");
                return Ok(true);
            }
            warn!("completing an interrupted claim");
        }

        match self.record_claim(owner_id, job_id, metadata, total_units).await {
            Ok(true) => {
                info!(total_units, "job started");
                Ok(true)
            }
            Ok(false) => {
                self.kv.delete_if_equals(&semaphore, job_id.as_str()).await?;
                Ok(false)
            }
            Err(e) => {
                self.roll_back_claim(owner_id, job_id).await;
                Err(e)
            }
        }
    }

    /// Take the job for `owner_id` and write its record. `false` when
    /// another owner is running the same job.
    async fn record_claim(
        &self,
        owner_id: &OwnerId,
        job_id: &JobId,
        metadata: &BTreeMap<String, String>,
        total_units: usize,
    ) -> JobResult<bool> {
        let holder_key = self.job_key(job_id, "holder");
        if !self.kv.set_if_absent(&holder_key, owner_id.as_str()).await? {
            let holder = self.kv.get(&holder_key).await?.unwrap_or_default();
            if holder != owner_id.as_str() {
                // A holder left behind by a terminated run does not count.
                let taken_over = self.status(job_id).await?.is_terminal()
                    && self.kv.delete_if_equals(&holder_key, &holder).await?
                    && self.kv.set_if_absent(&holder_key, owner_id.as_str()).await?;
                if !taken_over {
                    debug!(holder, "job held by another owner");
                    return Ok(false);
                }
            }
        }

        // Results left behind by an earlier, terminated run of the same job
        // must not be read back.
        self.kv.delete(&self.units_key(job_id)).await?;
        self.kv
            .set(&self.job_key(job_id, "total"), &total_units.to_string())
            .await?;
        self.kv
            .set(&self.job_key(job_id, "owner"), owner_id.as_str())
            .await?;

        let meta_key = self.job_key(job_id, "meta");
        self.kv.delete(&meta_key).await?;
        for (field, value) in metadata {
            self.kv.hash_set(&meta_key, field, value).await?;
        }

        // Written last: a running status implies a complete record.
        self.kv
            .set(&self.job_key(job_id, "status"), JobStatus::Running.as_str())
            .await?;
        self.kv
            .set(&self.last_job_key(owner_id), job_id.as_str())
            .await?;
        Ok(true)
    }

    async fn roll_back_claim(&self, owner_id: &OwnerId, job_id: &JobId) {
        let holder = self
            .kv
            .delete_if_equals(&self.job_key(job_id, "holder"), owner_id.as_str())
            .await;
        let slot = self
            .kv
            .delete_if_equals(&self.semaphore_key(owner_id), job_id.as_str())
            .await;
        if let Err(e) = holder.and(slot) {
            warn!(error = %e, "could not roll back interrupted claim");
        }
    }

    /// Store the result of one unit (last write wins) and return the
    /// recomputed progress.
    #[instrument(skip(self, result), fields(job_id = %job_id), err)]
    pub async fn record_unit(
        &self,
        job_id: &JobId,
        index: usize,
        result: &str,
    ) -> JobResult<JobProgress> {
        let total = self.require_total(job_id).await?;
        if index >= total {
            return Err(JobError::validation(format!(
                "unit index {index} out of range for job with {total} units"
            )));
        }

        self.kv
            .hash_set(&self.units_key(job_id), &index.to_string(), result)
            .await?;

        let completed = self.completed_indices(job_id, total).await?.len();
        let running = self.status(job_id).await? == JobStatus::Running;
        Ok(JobProgress::new(completed, total, running))
    }

    /// Indices in `[0, total_units)` that have no stored result.
    pub async fn outstanding(
        &self,
        job_id: &JobId,
        total_units: usize,
    ) -> JobResult<BTreeSet<usize>> {
        let completed = self.completed_indices(job_id, total_units).await?;
        Ok((0..total_units).filter(|i| !completed.contains(i)).collect())
    }

    async fn completed_indices(
        &self,
        job_id: &JobId,
        total_units: usize,
    ) -> JobResult<BTreeSet<usize>> {
        let fields = self.kv.hash_keys(&self.units_key(job_id)).await?;
        Ok(fields
            .iter()
            .filter_map(|f| f.parse::<usize>().ok())
            .filter(|i| *i < total_units)
            .collect())
    }

    /// Collect all results in index order, mark the job done, release the
    /// owner's slot and drop per-unit storage.
    ///
    /// Fails with [`JobError::IncompleteJob`] (and changes nothing) while any
    /// unit is still outstanding.
    #[instrument(skip(self), fields(job_id = %job_id), err)]
    pub async fn finish(&self, job_id: &JobId) -> JobResult<Vec<String>> {
        let total = self.require_total(job_id).await?;
        let mut stored = self.kv.hash_get_all(&self.units_key(job_id)).await?;

        let mut results = Vec::with_capacity(total);
        let mut missing = 0;
        for index in 0..total {
            match stored.remove(&index.to_string()) {
                Some(result) => results.push(result),
                None => missing += 1,
            }
        }
        if missing > 0 {
            return Err(JobError::IncompleteJob {
                job_id: job_id.clone(),
                outstanding: missing,
            });
        }

        self.terminate(job_id, JobStatus::Done).await?;
        info!(total, "job finished");
        Ok(results)
    }

    /// Cancel a job regardless of how far it got.
    #[instrument(skip(self), fields(job_id = %job_id, owner = %owner_id), err)]
    pub async fn cancel(&self, job_id: &JobId, owner_id: &OwnerId) -> JobResult<()> {
        match self.owner_of(job_id).await? {
            None => return Err(JobError::NotFound(job_id.clone())),
            Some(owner) if &owner != owner_id => {
                return Err(JobError::NotOwner {
                    job_id: job_id.clone(),
                    owner: owner_id.clone(),
                });
            }
            Some(_) => {}
        }

        self.terminate(job_id, JobStatus::Cancelled).await?;
        info!("job cancelled");
        Ok(())
    }

    async fn terminate(&self, job_id: &JobId, status: JobStatus) -> JobResult<()> {
        self.kv
            .set(&self.job_key(job_id, "status"), status.as_str())
            .await?;

        if let Some(owner) = self.owner_of(job_id).await? {
            let released = self
                .kv
                .delete_if_equals(&self.semaphore_key(&owner), job_id.as_str())
                .await?;
            if !released {
                debug!(owner = %owner, "owner slot was not held by this job");
            }
            self.kv
                .delete_if_equals(&self.job_key(job_id, "holder"), owner.as_str())
                .await?;
        }

        self.kv.delete(&self.units_key(job_id)).await?;
        Ok(())
    }

    pub async fn status(&self, job_id: &JobId) -> JobResult<JobStatus> {
        let key = self.job_key(job_id, "status");
        match self.kv.get(&key).await? {
            None => Ok(JobStatus::None),
            Some(raw) => JobStatus::parse(&raw)
                .ok_or_else(|| KvError::decode(key, format!("unknown job status {raw:?}")).into()),
        }
    }

    pub async fn total_units(&self, job_id: &JobId) -> JobResult<Option<usize>> {
        let key = self.job_key(job_id, "total");
        match self.kv.get(&key).await? {
            None => Ok(None),
            Some(raw) => raw
                .parse::<usize>()
                .map(Some)
                .map_err(|e| KvError::decode(key, e.to_string()).into()),
        }
    }

    async fn require_total(&self, job_id: &JobId) -> JobResult<usize> {
        self.total_units(job_id)
            .await?
            .ok_or_else(|| JobError::NotFound(job_id.clone()))
    }

    /// The owner currently running `job_id`, if any.
    pub async fn holder_of(&self, job_id: &JobId) -> JobResult<Option<OwnerId>> {
        let key = self.job_key(job_id, "holder");
        match self.kv.get(&key).await? {
            None => Ok(None),
            Some(raw) => OwnerId::new(raw)
                .map(Some)
                .map_err(|e| KvError::decode(key, e.to_string()).into()),
        }
    }

    pub async fn owner_of(&self, job_id: &JobId) -> JobResult<Option<OwnerId>> {
        let key = self.job_key(job_id, "owner");
        match self.kv.get(&key).await? {
            None => Ok(None),
            Some(raw) => OwnerId::new(raw)
                .map(Some)
                .map_err(|e| KvError::decode(key, e.to_string()).into()),
        }
    }

    pub async fn metadata(&self, job_id: &JobId) -> JobResult<BTreeMap<String, String>> {
        let fields = self.kv.hash_get_all(&self.job_key(job_id, "meta")).await?;
        Ok(fields.into_iter().collect())
    }

    /// Current progress of a job.
    ///
    /// Per-unit storage is dropped on completion, so a finished job reports
    /// all units complete; a cancelled one reports what is still stored.
    pub async fn progress(&self, job_id: &JobId) -> JobResult<JobProgress> {
        let total = self.require_total(job_id).await?;
        let status = self.status(job_id).await?;
        let completed = match status {
            JobStatus::Done => total,
            _ => self.completed_indices(job_id, total).await?.len(),
        };
        Ok(JobProgress::new(completed, total, status == JobStatus::Running))
    }

    /// The job currently holding `owner_id`'s slot, if any.
    pub async fn active_job(&self, owner_id: &OwnerId) -> JobResult<Option<JobId>> {
        let key = self.semaphore_key(owner_id);
        match self.kv.get(&key).await? {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|e: quire_core::DomainError| KvError::decode(key, e.to_string()).into()),
        }
    }

    /// The last job started by `owner_id`, if any.
    pub async fn last_job(&self, owner_id: &OwnerId) -> JobResult<Option<LastJob>> {
        let key = self.last_job_key(owner_id);
        let Some(raw) = self.kv.get(&key).await? else {
            return Ok(None);
        };
        let job_id: JobId = raw
            .parse()
            .map_err(|e: quire_core::DomainError| KvError::decode(key, e.to_string()))?;

        let status = self.status(&job_id).await?;
        let metadata = self.metadata(&job_id).await?;
        Ok(Some(LastJob {
            job_id,
            status,
            metadata,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::kv::InMemoryKeyValueStore;

    fn store() -> (Arc<InMemoryKeyValueStore>, JobStateStore<Arc<InMemoryKeyValueStore>>) {
        let kv = InMemoryKeyValueStore::arc();
        (kv.clone(), JobStateStore::new(kv))
    }

    fn owner(name: &str) -> OwnerId {
        OwnerId::new(name).unwrap()
    }

    fn job(title: &str) -> JobId {
        JobId::for_origin(title, "Some Author")
    }

    fn meta() -> BTreeMap<String, String> {
        BTreeMap::from([("origin_title".to_string(), "Dracula".to_string())])
    }

    #[tokio::test]
    async fn start_is_idempotent_for_the_same_job() {
        let (_, store) = store();
        let alice = owner("alice@example.com");
        let dracula = job("Dracula");

        assert!(store.start(&alice, &dracula, &meta(), 5).await.unwrap());
        assert!(store.start(&alice, &dracula, &meta(), 9).await.unwrap());

        // Replay must not reset the total.
        assert_eq!(store.total_units(&dracula).await.unwrap(), Some(5));
        assert_eq!(store.status(&dracula).await.unwrap(), JobStatus::Running);
    }

    #[tokio::test]
    async fn start_conflicts_with_a_different_active_job() {
        let (_, store) = store();
        let alice = owner("alice@example.com");
        let dracula = job("Dracula");
        let emma = job("Emma");

        assert!(store.start(&alice, &dracula, &meta(), 3).await.unwrap());
        assert!(!store.start(&alice, &emma, &meta(), 4).await.unwrap());
        assert_eq!(store.active_job(&alice).await.unwrap(), Some(dracula.clone()));

        // The losing start wrote nothing.
        assert_eq!(store.total_units(&emma).await.unwrap(), None);
        assert_eq!(store.status(&emma).await.unwrap(), JobStatus::None);

        // Other owners are unaffected.
        assert!(store.start(&owner("bob@example.com"), &emma, &meta(), 4).await.unwrap());
    }

    #[tokio::test]
    async fn progress_is_derived_from_stored_units() {
        let (_, store) = store();
        let alice = owner("alice@example.com");
        let dracula = job("Dracula");
        store.start(&alice, &dracula, &meta(), 3).await.unwrap();

        let p = store.record_unit(&dracula, 1, "b").await.unwrap();
        assert_eq!(p.to_string(), "1/3");

        // Re-recording the same index does not double count.
        let p = store.record_unit(&dracula, 1, "b2").await.unwrap();
        assert_eq!(p.to_string(), "1/3");
        assert!(p.running);

        let p = store.record_unit(&dracula, 0, "a").await.unwrap();
        assert_eq!(p.to_string(), "2/3");
        assert_eq!(p.remaining, 1);

        assert!(matches!(
            store.record_unit(&dracula, 3, "out of range").await,
            Err(JobError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn outstanding_is_the_complement_of_stored_indices() {
        let (_, store) = store();
        let alice = owner("alice@example.com");
        let dracula = job("Dracula");
        store.start(&alice, &dracula, &meta(), 4).await.unwrap();

        let all: BTreeSet<usize> = (0..4).collect();
        assert_eq!(store.outstanding(&dracula, 4).await.unwrap(), all);

        store.record_unit(&dracula, 0, "a").await.unwrap();
        store.record_unit(&dracula, 2, "c").await.unwrap();
        assert_eq!(
            store.outstanding(&dracula, 4).await.unwrap(),
            BTreeSet::from([1, 3])
        );

        store.record_unit(&dracula, 1, "b").await.unwrap();
        store.record_unit(&dracula, 3, "d").await.unwrap();
        assert!(store.outstanding(&dracula, 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn finish_returns_results_in_index_order_and_releases_owner() {
        let (kv, store) = store();
        let alice = owner("alice@example.com");
        let dracula = job("Dracula");
        store.start(&alice, &dracula, &meta(), 3).await.unwrap();

        for (i, r) in [(2, "c"), (0, "a"), (1, "b")] {
            store.record_unit(&dracula, i, r).await.unwrap();
        }

        let results = store.finish(&dracula).await.unwrap();
        assert_eq!(results, vec!["a", "b", "c"]);
        assert_eq!(store.status(&dracula).await.unwrap(), JobStatus::Done);
        assert!(!kv.contains_key(&store.semaphore_key(&alice)));
        assert!(!kv.contains_key(&store.units_key(&dracula)));
        assert_eq!(store.progress(&dracula).await.unwrap().to_string(), "3/3");
    }

    #[tokio::test]
    async fn finish_refuses_incomplete_jobs() {
        let (kv, store) = store();
        let alice = owner("alice@example.com");
        let dracula = job("Dracula");
        store.start(&alice, &dracula, &meta(), 2).await.unwrap();
        store.record_unit(&dracula, 0, "a").await.unwrap();

        assert_eq!(
            store.finish(&dracula).await,
            Err(JobError::IncompleteJob {
                job_id: dracula.clone(),
                outstanding: 1
            })
        );
        assert!(kv.contains_key(&store.semaphore_key(&alice)));
        assert_eq!(store.status(&dracula).await.unwrap(), JobStatus::Running);
    }

    #[tokio::test]
    async fn cancel_releases_owner_and_drops_units() {
        let (kv, store) = store();
        let alice = owner("alice@example.com");
        let dracula = job("Dracula");
        store.start(&alice, &dracula, &meta(), 5).await.unwrap();
        store.record_unit(&dracula, 0, "a").await.unwrap();
        store.record_unit(&dracula, 1, "b").await.unwrap();

        store.cancel(&dracula, &alice).await.unwrap();

        assert_eq!(store.status(&dracula).await.unwrap(), JobStatus::Cancelled);
        assert!(!kv.contains_key(&store.semaphore_key(&alice)));
        assert!(!kv.contains_key(&store.units_key(&dracula)));

        let emma = job("Emma");
        assert!(store.start(&alice, &emma, &meta(), 2).await.unwrap());
    }

    #[tokio::test]
    async fn cancel_checks_ownership() {
        let (_, store) = store();
        let alice = owner("alice@example.com");
        let mallory = owner("mallory@example.com");
        let dracula = job("Dracula");

        assert_eq!(
            store.cancel(&dracula, &alice).await,
            Err(JobError::NotFound(dracula.clone()))
        );

        store.start(&alice, &dracula, &meta(), 2).await.unwrap();
        assert!(matches!(
            store.cancel(&dracula, &mallory).await,
            Err(JobError::NotOwner { .. })
        ));
        assert_eq!(store.status(&dracula).await.unwrap(), JobStatus::Running);
    }

    #[tokio::test]
    async fn restart_after_termination_starts_from_scratch() {
        let (_, store) = store();
        let alice = owner("alice@example.com");
        let dracula = job("Dracula");
        store.start(&alice, &dracula, &meta(), 3).await.unwrap();
        store.record_unit(&dracula, 0, "a").await.unwrap();
        store.cancel(&dracula, &alice).await.unwrap();

        // A late write from an in-flight task lands on leftover keys.
        store.record_unit(&dracula, 1, "late").await.unwrap();

        assert!(store.start(&alice, &dracula, &meta(), 3).await.unwrap());
        assert_eq!(store.outstanding(&dracula, 3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn last_job_reports_metadata_and_status() {
        let (_, store) = store();
        let alice = owner("alice@example.com");
        assert_eq!(store.last_job(&alice).await.unwrap(), None);

        let dracula = job("Dracula");
        store.start(&alice, &dracula, &meta(), 1).await.unwrap();

        let last = store.last_job(&alice).await.unwrap().unwrap();
        assert_eq!(last.job_id, dracula);
        assert_eq!(last.status, JobStatus::Running);
        assert_eq!(last.metadata, meta());
    }

    #[tokio::test]
    async fn store_outage_fails_closed() {
        let (kv, store) = store();
        let alice = owner("alice@example.com");
        let dracula = job("Dracula");

        kv.set_available(false);
        assert!(matches!(
            store.start(&alice, &dracula, &meta(), 2).await,
            Err(JobError::StoreUnavailable(KvError::Unavailable(_)))
        ));

        kv.set_available(true);
        assert_eq!(store.status(&dracula).await.unwrap(), JobStatus::None);
    }

    #[tokio::test]
    async fn a_running_job_belongs_to_one_owner_at_a_time() {
        let (_, store) = store();
        let alice = owner("alice@example.com");
        let bob = owner("bob@example.com");
        let dracula = job("Dracula");

        assert!(store.start(&alice, &dracula, &meta(), 3).await.unwrap());
        store.record_unit(&dracula, 0, "uno").await.unwrap();

        assert!(!store.start(&bob, &dracula, &meta(), 3).await.unwrap());
        assert_eq!(store.active_job(&bob).await.unwrap(), None);
        assert_eq!(store.holder_of(&dracula).await.unwrap(), Some(alice.clone()));
        assert_eq!(store.owner_of(&dracula).await.unwrap(), Some(alice.clone()));
        assert_eq!(
            store.outstanding(&dracula, 3).await.unwrap(),
            BTreeSet::from([1, 2])
        );

        store.record_unit(&dracula, 1, "dos").await.unwrap();
        store.record_unit(&dracula, 2, "tres").await.unwrap();
        store.finish(&dracula).await.unwrap();
        assert_eq!(store.active_job(&alice).await.unwrap(), None);
        assert_eq!(store.holder_of(&dracula).await.unwrap(), None);

        // Once finished, the job is free for anyone.
        assert!(store.start(&bob, &dracula, &meta(), 3).await.unwrap());
        assert_eq!(store.owner_of(&dracula).await.unwrap(), Some(bob));
        assert!(store.start(&alice, &job("Emma"), &meta(), 1).await.unwrap());
    }

    /// Fails the `fail_at`-th call (1-indexed). With `sticky`, every later
    /// call fails as well until `heal`.
    struct FailingKv {
        inner: InMemoryKeyValueStore,
        calls: AtomicUsize,
        fail_at: usize,
        sticky: bool,
        healed: AtomicBool,
    }

    impl FailingKv {
        fn new(fail_at: usize, sticky: bool) -> Arc<Self> {
            Arc::new(Self {
                inner: InMemoryKeyValueStore::new(),
                calls: AtomicUsize::new(0),
                fail_at,
                sticky,
                healed: AtomicBool::new(false),
            })
        }

        fn heal(&self) {
            self.healed.store(true, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), KvError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let failing = if self.sticky {
                call >= self.fail_at && !self.healed.load(Ordering::SeqCst)
            } else {
                call == self.fail_at
            };
            if failing {
                Err(KvError::Unavailable(format!("connection reset on call {call}")))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl KeyValueStore for FailingKv {
        async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, KvError> {
            self.check()?;
            self.inner.set_if_absent(key, value).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
            self.check()?;
            self.inner.set(key, value).await
        }

        async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
            self.check()?;
            self.inner.get(key).await
        }

        async fn delete(&self, key: &str) -> Result<(), KvError> {
            self.check()?;
            self.inner.delete(key).await
        }

        async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, KvError> {
            self.check()?;
            self.inner.delete_if_equals(key, expected).await
        }

        async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), KvError> {
            self.check()?;
            self.inner.hash_set(key, field, value).await
        }

        async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, KvError> {
            self.check()?;
            self.inner.hash_get_all(key).await
        }

        async fn hash_keys(&self, key: &str) -> Result<Vec<String>, KvError> {
            self.check()?;
            self.inner.hash_keys(key).await
        }
    }

    async fn assert_recovered(store: &JobStateStore<Arc<FailingKv>>, alice: &OwnerId, dracula: &JobId) {
        assert_eq!(store.status(dracula).await.unwrap(), JobStatus::Running);
        assert_eq!(store.owner_of(dracula).await.unwrap().as_ref(), Some(alice));
        assert_eq!(store.total_units(dracula).await.unwrap(), Some(3));
        assert_eq!(store.metadata(dracula).await.unwrap(), meta());

        store.cancel(dracula, alice).await.unwrap();
        assert_eq!(store.active_job(alice).await.unwrap(), None);
        assert!(store.start(alice, &job("Emma"), &meta(), 1).await.unwrap());
    }

    #[tokio::test]
    async fn interrupted_start_can_always_be_replayed() {
        let alice = owner("alice@example.com");
        let dracula = job("Dracula");

        // A fresh claim with one metadata field issues ten store calls.
        for fail_at in 1..=10 {
            let kv = FailingKv::new(fail_at, false);
            let store = JobStateStore::new(kv.clone());

            assert!(
                matches!(
                    store.start(&alice, &dracula, &meta(), 3).await,
                    Err(JobError::StoreUnavailable(_))
                ),
                "call {fail_at} did not fail the start"
            );

            assert!(store.start(&alice, &dracula, &meta(), 3).await.unwrap());
            assert_recovered(&store, &alice, &dracula).await;
        }
    }

    #[tokio::test]
    async fn claim_left_behind_by_an_outage_is_completed_on_replay() {
        let alice = owner("alice@example.com");
        let dracula = job("Dracula");
        // Fails from the `total` write on, so the rollback fails too.
        let kv = FailingKv::new(5, true);
        let store = JobStateStore::new(kv.clone());

        assert!(store.start(&alice, &dracula, &meta(), 3).await.is_err());
        kv.heal();
        assert_eq!(store.active_job(&alice).await.unwrap(), Some(dracula.clone()));
        assert_eq!(store.status(&dracula).await.unwrap(), JobStatus::None);

        assert!(store.start(&alice, &dracula, &meta(), 3).await.unwrap());
        assert_recovered(&store, &alice, &dracula).await;
    }
}
