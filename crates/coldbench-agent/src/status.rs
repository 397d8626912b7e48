//! Status record writes.
//!
//! Only this Agent writes its own status records, but several tasks inside
//! it (parallel unit measurement, cleanup) may update the same record, so
//! every read-modify-write goes through the Agent's status lock.

use tracing::{error, warn};

use coldbench_core::{Phase, StatusRecord, epoch_secs};

use crate::agent::Agent;
use crate::error::{AgentError, AgentResult};

impl Agent {
    pub(crate) async fn update_status<F>(&self, run_id: &str, apply: F) -> AgentResult<StatusRecord>
    where
        F: FnOnce(&mut StatusRecord) -> AgentResult<()>,
    {
        let inner = self.inner();
        let _guard = inner.status_lock.lock().await;
        let mut status = inner
            .store
            .get_status(run_id, &inner.service_type)?
            .ok_or_else(|| AgentError::NotFound(format!("status for run {run_id}")))?;
        apply(&mut status)?;
        status.updated_at = epoch_secs();
        inner.store.put_status(&status)?;
        Ok(status)
    }

    pub(crate) async fn advance(&self, run_id: &str, next: Phase) -> AgentResult<StatusRecord> {
        self.update_status(run_id, |s| Ok(s.advance(next)?)).await
    }

    /// Move the run to `failed` with `reason`. Never fails; a status that
    /// cannot be written is logged.
    pub(crate) async fn fail_run(&self, run_id: &str, reason: &str) {
        let result = self
            .update_status(run_id, |s| {
                s.fail(reason);
                Ok(())
            })
            .await;
        match result {
            Ok(_) => warn!(%run_id, service_type = %self.service_type(), %reason, "run failed"),
            Err(e) => error!(%run_id, error = %e, %reason, "could not record run failure"),
        }
    }

    /// Count one finished unit in the run's progress.
    pub(crate) async fn record_unit(&self, run_id: &str, succeeded: bool) {
        let result = self
            .update_status(run_id, |s| {
                if succeeded {
                    s.progress.completed += 1;
                } else {
                    s.progress.failed += 1;
                }
                Ok(())
            })
            .await;
        if let Err(e) = result {
            warn!(%run_id, error = %e, "progress update failed");
        }
    }
}
