//! Scheduling interface and the object-store backed implementation.

use async_trait::async_trait;
use tracing::{debug, info};

use coldbench_core::epoch_secs;
use coldbench_state::{RunStore, paths};

use crate::error::TriggerResult;
use crate::job::{TriggerJob, TriggerSpec};

/// Creates and removes one-shot delayed callbacks.
///
/// A managed cloud scheduler can sit behind this trait; the bundled
/// implementation keeps jobs in the object store for the dispatcher.
#[async_trait]
pub trait TriggerScheduler: Send + Sync {
    /// Schedule `spec` and return its job id. Creating a job that already
    /// exists returns the existing id without re-arming it.
    async fn create(&self, spec: &TriggerSpec) -> TriggerResult<String>;

    /// Remove a job. Deleting an absent job is not an error; the return
    /// value says whether anything was removed.
    async fn delete(&self, job_id: &str) -> TriggerResult<bool>;

    async fn get(&self, job_id: &str) -> TriggerResult<Option<TriggerJob>>;
}

/// Trigger jobs stored as JSON documents under `triggers/`.
#[derive(Clone)]
pub struct StoreScheduler {
    store: RunStore,
}

impl StoreScheduler {
    pub fn new(store: RunStore) -> Self {
        Self { store }
    }

    /// All stored jobs, in path order. Unreadable documents are skipped.
    pub fn list(&self) -> TriggerResult<Vec<TriggerJob>> {
        let mut jobs = Vec::new();
        for path in self.store.list(paths::TRIGGERS_PREFIX)? {
            match self.store.get_json::<TriggerJob>(&path) {
                Ok(Some(job)) => jobs.push(job),
                Ok(None) => {}
                Err(e) => debug!(%path, error = %e, "skipping unreadable trigger"),
            }
        }
        Ok(jobs)
    }

    /// Overwrite a job's stored state.
    pub fn save(&self, job: &TriggerJob) -> TriggerResult<()> {
        self.store.put_json(&paths::trigger(&job.id), job)?;
        Ok(())
    }

    /// Overwrite a job's stored state unless it was deleted meanwhile.
    /// Returns whether the job was still there.
    pub fn update(&self, job: &TriggerJob) -> TriggerResult<bool> {
        Ok(self.store.put_json_if_present(&paths::trigger(&job.id), job)?)
    }
}

#[async_trait]
impl TriggerScheduler for StoreScheduler {
    async fn create(&self, spec: &TriggerSpec) -> TriggerResult<String> {
        spec.validate()?;
        let job = TriggerJob::from_spec(spec, epoch_secs());
        let created = self
            .store
            .put_json_if_absent(&paths::trigger(&job.id), &job)?;
        if created {
            info!(job_id = %job.id, run_id = %job.run_id, fire_at = job.fire_at, "trigger scheduled");
        } else {
            debug!(job_id = %job.id, "trigger already scheduled");
        }
        Ok(job.id)
    }

    async fn delete(&self, job_id: &str) -> TriggerResult<bool> {
        let removed = self.store.delete(&paths::trigger(job_id))?;
        debug!(%job_id, removed, "trigger delete");
        Ok(removed)
    }

    async fn get(&self, job_id: &str) -> TriggerResult<Option<TriggerJob>> {
        Ok(self.store.get_json(&paths::trigger(job_id))?)
    }
}
