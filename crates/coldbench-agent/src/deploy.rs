//! Deploy handler: expand, deploy, persist the manifest, schedule Measure.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use coldbench_core::*;
use coldbench_trigger::TriggerSpec;

use crate::agent::Agent;
use crate::error::{AgentError, AgentResult};
use crate::matrix::{self, RunConfig, UnitPlan};
use crate::platform::UnitSpec;

/// Whether a deploy ends by scheduling the Measure trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Schedule {
    Trigger,
    /// Legacy single-call benchmark: measure right away, no trigger.
    Immediate,
}

impl Agent {
    /// `POST /deploy`.
    pub async fn deploy(&self, request: BenchmarkRequest) -> AgentResult<DeployResponse> {
        self.deploy_run(request, Schedule::Trigger).await
    }

    pub(crate) async fn deploy_run(
        &self,
        request: BenchmarkRequest,
        schedule: Schedule,
    ) -> AgentResult<DeployResponse> {
        let run_id = request.run_id.clone();
        validate_run_id(&run_id)?;
        request.benchmark_config.validate()?;

        let run = RunConfig::from_payload(&request.agent_config)?;
        let plans = matrix::expand(
            &run,
            &self.active_implementations(),
            &self.inner().defaults.dimensions,
        )?;
        let delay_minutes = match schedule {
            Schedule::Trigger => run
                .measure_delay_minutes()
                .unwrap_or(self.inner().defaults.measure_delay_minutes),
            Schedule::Immediate => 0,
        };

        self.claim(&run_id)?;
        info!(%run_id, service_type = %self.service_type(), units = plans.len(), "deploy started");

        match self
            .deploy_claimed(&request, plans, delay_minutes, schedule)
            .await
        {
            Ok(response) => Ok(response),
            Err(e) => {
                self.fail_run(&run_id, &e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Reserve the run id. A second deploy of the same run is rejected
    /// whether or not the first one finished.
    fn claim(&self, run_id: &str) -> AgentResult<()> {
        let inner = self.inner();
        if inner.store.get_manifest(run_id, &inner.service_type)?.is_some() {
            return Err(AgentError::Duplicate(run_id.to_string()));
        }
        let status = StatusRecord::new(run_id, &inner.service_type);
        if !inner.store.claim_status(&status)? {
            return Err(AgentError::Duplicate(run_id.to_string()));
        }
        Ok(())
    }

    async fn deploy_claimed(
        &self,
        request: &BenchmarkRequest,
        plans: Vec<UnitPlan>,
        delay_minutes: u64,
        schedule: Schedule,
    ) -> AgentResult<DeployResponse> {
        let run_id = request.run_id.as_str();
        let total = plans.len() as u32;
        self.update_status(run_id, |s| {
            s.advance(Phase::Deploying)?;
            s.progress.total = total;
            Ok(())
        })
        .await?;

        let services = self.deploy_units(run_id, plans).await;
        let failed: Vec<&DeployedService> = services
            .iter()
            .filter(|s| s.status == UnitStatus::Failed)
            .collect();
        let deploy_errors: Vec<String> = failed
            .iter()
            .map(|s| {
                format!(
                    "{}: {}",
                    s.deployment_unit_id,
                    s.error.as_deref().unwrap_or("deploy failed")
                )
            })
            .collect();

        let deployed_at = epoch_secs();
        let measure_scheduled_at = deployed_at + delay_minutes * 60;
        let all_failed = failed.len() == services.len();

        let mut trigger_id = None;
        if all_failed {
            warn!(%run_id, units = services.len(), "every unit failed to deploy");
        } else if self.inner().store.is_cancelled(run_id, self.service_type())? {
            self.delete_units(run_id, &services).await;
            return Err(AgentError::Cancelled(run_id.to_string()));
        } else if schedule == Schedule::Trigger {
            match self.schedule_measure(run_id, measure_scheduled_at).await {
                Ok(id) => trigger_id = Some(id),
                Err(e) => {
                    error!(%run_id, error = %e, "trigger creation failed, rolling back");
                    self.delete_units(run_id, &services).await;
                    return Err(e);
                }
            }
        }

        let manifest = DeploymentManifest {
            run_id: run_id.to_string(),
            service_type: self.service_type().to_string(),
            deployed_at,
            measure_delay_minutes: delay_minutes,
            measure_scheduled_at,
            scheduler_trigger_id: trigger_id.clone(),
            benchmark_config: request.benchmark_config.clone(),
            services,
        };
        if !self.inner().store.create_manifest(&manifest)? {
            return Err(AgentError::Duplicate(run_id.to_string()));
        }
        // Cleanup writes its tombstone before reading the manifest, so one
        // that ran before the manifest existed is visible here.
        if self.inner().store.is_cancelled(run_id, self.service_type())? {
            self.abandon_cancelled(run_id, &manifest).await;
            return Err(AgentError::Cancelled(run_id.to_string()));
        }

        let status = self
            .update_status(run_id, |s| {
                s.errors.extend(deploy_errors);
                if all_failed {
                    s.fail("all units failed to deploy");
                } else if s.phase < Phase::Waiting {
                    // Cleanup or an early trigger may already have moved it on.
                    s.advance(Phase::Waiting)?;
                }
                Ok(())
            })
            .await?;

        info!(
            %run_id,
            service_type = %self.service_type(),
            units = total,
            failed = failed_count(&manifest),
            measure_scheduled_at,
            phase = %status.phase,
            "deploy finished"
        );
        Ok(DeployResponse {
            run_id: run_id.to_string(),
            status: status.phase,
            services_to_deploy: total,
            measure_scheduled_at,
            scheduler_job_id: trigger_id,
        })
    }

    /// Deploy every planned unit with bounded parallelism. Failures are
    /// recorded on the unit and never abort siblings. Output keeps plan order.
    async fn deploy_units(&self, run_id: &str, plans: Vec<UnitPlan>) -> Vec<DeployedService> {
        let semaphore = Arc::new(Semaphore::new(self.inner().defaults.deploy_parallelism));
        let env = self.inner().probe.deploy_env();
        let mut set = JoinSet::new();

        for (index, plan) in plans.into_iter().enumerate() {
            let unit = UnitSpec {
                unit_id: matrix::unit_id(self.service_type(), &plan.implementation, run_id, index),
                service_type: self.service_type().to_string(),
                run_id: run_id.to_string(),
                implementation: plan.implementation,
                dimensions: plan.dimensions,
                env: env.clone(),
            };
            let agent = self.clone();
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (index, agent.deploy_unit(unit).await)
            });
        }

        let mut services = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(done) => services.push(done),
                Err(e) => error!(%run_id, error = %e, "deploy task panicked"),
            }
        }
        services.sort_by_key(|(index, _)| *index);
        services.into_iter().map(|(_, s)| s).collect()
    }

    /// One unit: deploy under the per-unit timeout, retrying once after
    /// backoff on a transient failure.
    async fn deploy_unit(&self, unit: UnitSpec) -> DeployedService {
        let defaults = &self.inner().defaults;
        let started_at = epoch_secs();
        let start = Instant::now();

        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            let result = match tokio::time::timeout(
                defaults.deploy_timeout(),
                self.inner().platform.deploy(&unit),
            )
            .await
            {
                Ok(r) => r,
                Err(_) => Err(AgentError::Transient(format!(
                    "deploy timed out after {}s",
                    defaults.deploy_timeout_secs
                ))),
            };
            match result {
                Err(e) if e.is_transient() && attempt < 2 => {
                    warn!(unit = %unit.unit_id, error = %e, "deploy failed, retrying");
                    tokio::time::sleep(defaults.retry_backoff()).await;
                }
                other => break other,
            }
        };

        let deploy_duration_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(endpoint) => {
                debug!(unit = %unit.unit_id, %endpoint, deploy_duration_ms, "unit deployed");
                DeployedService {
                    implementation: unit.implementation,
                    deployment_unit_id: unit.unit_id,
                    endpoint: Some(endpoint),
                    dimensions: unit.dimensions,
                    deployed_at: started_at,
                    deploy_duration_ms,
                    status: UnitStatus::Deployed,
                    error: None,
                }
            }
            Err(e) => {
                warn!(unit = %unit.unit_id, error = %e, "unit deploy failed");
                DeployedService {
                    implementation: unit.implementation,
                    deployment_unit_id: unit.unit_id,
                    endpoint: None,
                    dimensions: unit.dimensions,
                    deployed_at: started_at,
                    deploy_duration_ms,
                    status: UnitStatus::Failed,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Create the one-shot Measure trigger, retrying once on failure.
    async fn schedule_measure(&self, run_id: &str, fire_at: u64) -> AgentResult<String> {
        let spec = TriggerSpec {
            owner: self.service_type().to_string(),
            run_id: run_id.to_string(),
            target: self.inner().measure_url.clone(),
            fire_at,
        };
        match self.inner().scheduler.create(&spec).await {
            Ok(id) => Ok(id),
            Err(first) => {
                let first = AgentError::from(first);
                if !first.is_transient() {
                    return Err(first);
                }
                warn!(%run_id, error = %first, "trigger creation failed, retrying");
                tokio::time::sleep(self.inner().defaults.retry_backoff()).await;
                Ok(self.inner().scheduler.create(&spec).await?)
            }
        }
    }

    /// Undo what a deploy raced past a concurrent cleanup: the trigger and
    /// the units.
    async fn abandon_cancelled(&self, run_id: &str, manifest: &DeploymentManifest) {
        warn!(%run_id, "run cancelled during deploy, removing trigger and units");
        if let Some(job_id) = &manifest.scheduler_trigger_id {
            if let Err(e) = self.inner().scheduler.delete(job_id).await {
                warn!(%run_id, %job_id, error = %e, "trigger delete failed");
            }
        }
        self.delete_units(run_id, &manifest.services).await;
    }

    /// Best-effort teardown of deployed units. Returns how many were removed.
    pub(crate) async fn delete_units(&self, run_id: &str, services: &[DeployedService]) -> u32 {
        let mut deleted = 0;
        for unit in services.iter().filter(|s| s.status == UnitStatus::Deployed) {
            match self.inner().platform.delete(unit).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    warn!(%run_id, unit = %unit.deployment_unit_id, error = %e, "unit delete failed")
                }
            }
        }
        deleted
    }
}

fn failed_count(manifest: &DeploymentManifest) -> usize {
    manifest
        .services
        .iter()
        .filter(|s| s.status == UnitStatus::Failed)
        .count()
}
