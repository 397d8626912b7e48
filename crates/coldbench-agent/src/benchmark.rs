//! Legacy single-call benchmark: deploy, wait, then measure in the same call.
//!
//! Kept for manual and debug runs. No trigger is created; the call itself
//! waits out the run's scale-to-zero window so the first sample is a real
//! cold start.

use std::time::Duration;

use tracing::info;

use coldbench_core::*;

use crate::agent::Agent;
use crate::deploy::Schedule;
use crate::error::{AgentError, AgentResult};

impl Agent {
    /// `POST /benchmark`.
    pub async fn benchmark(&self, request: BenchmarkRequest) -> AgentResult<MeasureResponse> {
        let run_id = request.run_id.clone();
        let idle_wait = Duration::from_secs(request.benchmark_config.scale_to_zero_timeout_secs);
        let deployed = self.deploy_run(request, Schedule::Immediate).await?;
        if deployed.status == Phase::Failed {
            return Err(AgentError::Transient(format!(
                "run {run_id}: every unit failed to deploy"
            )));
        }
        info!(
            %run_id,
            units = deployed.services_to_deploy,
            wait_secs = idle_wait.as_secs(),
            "legacy benchmark waiting for scale to zero"
        );
        tokio::time::sleep(idle_wait).await;
        self.measure(&run_id).await
    }
}
