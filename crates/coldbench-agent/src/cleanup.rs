//! Cleanup handler: cancel a run, tear down its units, drop its trigger.
//!
//! Safe to call while Measure is running: deleted units make in-flight
//! requests fail, which Measure records as ordinary measurement errors.

use tracing::{info, warn};

use coldbench_core::*;

use crate::agent::Agent;
use crate::error::{AgentError, AgentResult};

const CANCELLED: &str = "cancelled";

impl Agent {
    /// `POST /cleanup`.
    pub async fn cleanup(&self, run_id: &str) -> AgentResult<CleanupResponse> {
        validate_run_id(run_id)?;
        let inner = self.inner();
        let manifest = inner.store.get_manifest(run_id, &inner.service_type)?;
        let status = inner.store.get_status(run_id, &inner.service_type)?;
        if manifest.is_none() && status.is_none() {
            return Err(AgentError::NotFound(format!("run {run_id}")));
        }

        // Tombstone first, so a trigger firing from here on is refused.
        inner.store.mark_cancelled(run_id, &inner.service_type)?;

        let mut scheduler_job_deleted = false;
        let mut services_deleted = 0;
        if let Some(manifest) = &manifest {
            if let Some(job_id) = &manifest.scheduler_trigger_id {
                match inner.scheduler.delete(job_id).await {
                    Ok(removed) => scheduler_job_deleted = removed,
                    Err(e) => warn!(%run_id, %job_id, error = %e, "trigger delete failed"),
                }
            }
            services_deleted = self.delete_units(run_id, &manifest.services).await;
        }

        if status.is_some_and(|s| !s.phase.is_terminal()) {
            self.fail_run(run_id, CANCELLED).await;
        }

        info!(%run_id, services_deleted, scheduler_job_deleted, "run cleaned up");
        Ok(CleanupResponse {
            run_id: run_id.to_string(),
            services_deleted,
            scheduler_job_deleted,
        })
    }
}
