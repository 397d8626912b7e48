//! Measure handler: resume a deployed run and measure every unit.
//!
//! Entry is split in two so the HTTP layer can answer quickly:
//! [`Agent::prepare_measure`] checks preconditions and claims the run,
//! [`Agent::execute_measure`] does the (long) measurement work.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

use coldbench_core::*;

use crate::agent::Agent;
use crate::bench::{self, ColdStartParams, WarmParams};
use crate::config::AgentDefaults;
use crate::error::{AgentError, AgentResult};

/// Slack on top of a unit's computed worst case.
const BUDGET_MARGIN: Duration = Duration::from_secs(60);

/// Time past a unit's deadline before its measurement is abandoned outright.
const ABANDON_GRACE: Duration = Duration::from_secs(30);

/// Worst-case wall time to measure one unit: every idle wait runs to its
/// limit and every request to its timeout. `measure_timeout_secs`, when
/// set, caps it.
pub fn unit_budget(config: &BenchmarkConfig, defaults: &AgentDefaults, contract_vectors: usize) -> Duration {
    let request = Duration::from_millis(config.request_timeout_ms);
    let later_iterations = config.cold_start_iterations.saturating_sub(1);
    let warm_rounds = config
        .warm_requests
        .div_ceil(config.warm_concurrency.max(1));

    let worst = defaults.idle_poll_timeout()
        + Duration::from_secs(config.scale_to_zero_timeout_secs) * later_iterations
        + request * config.cold_start_iterations
        + request * warm_rounds
        + request * contract_vectors as u32;
    let budget = worst + worst / 10 + BUDGET_MARGIN;
    match defaults.measure_timeout() {
        Some(cap) => budget.min(cap),
        None => budget,
    }
}

/// Outcome of the precondition check.
#[derive(Debug)]
pub enum MeasurePlan {
    /// Nothing to do: the run already finished or is being measured.
    Done(MeasureResponse),
    /// Run claimed for measurement.
    Run(MeasureJob),
}

#[derive(Debug)]
pub struct MeasureJob {
    manifest: DeploymentManifest,
}

impl MeasureJob {
    pub fn run_id(&self) -> &str {
        &self.manifest.run_id
    }
}

impl Agent {
    /// `POST /measure`, awaited to completion.
    pub async fn measure(&self, run_id: &str) -> AgentResult<MeasureResponse> {
        match self.prepare_measure(run_id).await? {
            MeasurePlan::Done(response) => Ok(response),
            MeasurePlan::Run(job) => self.execute_measure(job).await,
        }
    }

    fn measure_response(&self, run_id: &str, phase: Phase) -> AgentResult<MeasureResponse> {
        let has_results = self
            .inner()
            .store
            .get_results(run_id, self.service_type())?
            .is_some();
        Ok(MeasureResponse {
            run_id: run_id.to_string(),
            status: phase,
            results_url: has_results.then(|| results_path(run_id)),
        })
    }

    pub async fn prepare_measure(&self, run_id: &str) -> AgentResult<MeasurePlan> {
        validate_run_id(run_id)?;
        let inner = self.inner();
        if inner.store.is_cancelled(run_id, &inner.service_type)? {
            return Err(AgentError::Cancelled(run_id.to_string()));
        }
        let manifest = inner
            .store
            .get_manifest(run_id, &inner.service_type)?
            .ok_or_else(|| AgentError::NotFound(format!("deployment manifest for run {run_id}")))?;

        let current = self.status(run_id)?;
        let stale_after = self.phase_budget(&manifest).as_secs();
        let measuring = current.phase == Phase::Measuring;
        let in_flight = measuring && epoch_secs().saturating_sub(current.updated_at) < stale_after;
        if current.phase.is_terminal() || in_flight {
            info!(%run_id, phase = %current.phase, "measure skipped");
            return Ok(MeasurePlan::Done(self.measure_response(run_id, current.phase)?));
        }
        if measuring {
            warn!(%run_id, updated_at = current.updated_at, "taking over stale measurement");
        }

        let total = manifest.services.len() as u32;
        self.update_status(run_id, |s| {
            if s.phase != current.phase {
                return Err(AgentError::Duplicate(run_id.to_string()));
            }
            if measuring {
                s.errors.push("previous measurement abandoned".into());
            } else {
                s.advance(Phase::Measuring)?;
            }
            s.progress.total = total;
            s.progress.completed = 0;
            s.progress.failed = 0;
            Ok(())
        })
        .await?;

        info!(%run_id, service_type = %inner.service_type, units = total, "measure started");
        Ok(MeasurePlan::Run(MeasureJob { manifest }))
    }

    /// Longest a whole measure phase can legitimately run; a `measuring`
    /// status older than this was abandoned.
    fn phase_budget(&self, manifest: &DeploymentManifest) -> Duration {
        let inner = self.inner();
        let unit = unit_budget(
            &manifest.benchmark_config,
            &inner.defaults,
            inner.probe.contract_vectors().len(),
        );
        let waves = manifest
            .services
            .len()
            .div_ceil(inner.defaults.measure_parallelism.max(1))
            .max(1) as u32;
        (unit + ABANDON_GRACE) * waves
    }

    pub async fn execute_measure(&self, job: MeasureJob) -> AgentResult<MeasureResponse> {
        let run_id = job.manifest.run_id.clone();
        match self.measure_units(&job.manifest).await {
            Ok(response) => Ok(response),
            Err(e) => {
                self.fail_run(&run_id, &e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn measure_units(&self, manifest: &DeploymentManifest) -> AgentResult<MeasureResponse> {
        let run_id = manifest.run_id.as_str();
        let defaults = &self.inner().defaults;
        let budget = unit_budget(
            &manifest.benchmark_config,
            defaults,
            self.inner().probe.contract_vectors().len(),
        );
        let semaphore = Arc::new(Semaphore::new(defaults.measure_parallelism));

        let mut records: Vec<(usize, ResultRecord)> = Vec::with_capacity(manifest.services.len());
        let mut set = JoinSet::new();
        for (index, unit) in manifest.services.iter().enumerate() {
            if unit.status == UnitStatus::Failed {
                let reason = unit.error.clone().unwrap_or_else(|| "deploy failed".into());
                records.push((index, ResultRecord::failed(unit, format!("deploy: {reason}"))));
                self.record_unit(run_id, false).await;
                continue;
            }
            let agent = self.clone();
            let unit = unit.clone();
            let config = manifest.benchmark_config.clone();
            let semaphore = semaphore.clone();
            let run_id = run_id.to_string();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let deadline = Instant::now() + budget;
                let measured = agent.measure_unit(&unit, &config, deadline);
                let record = match tokio::time::timeout_at(deadline + ABANDON_GRACE, measured).await {
                    Ok(record) => record,
                    Err(_) => ResultRecord::failed(&unit, "measurement abandoned past the unit deadline"),
                };
                agent
                    .record_unit(&run_id, record.status == ResultStatus::Success)
                    .await;
                (index, record)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(done) => records.push(done),
                Err(e) => error!(%run_id, error = %e, "measure task panicked"),
            }
        }
        // A panicked task leaves its unit without a record; fill the gap.
        for (index, unit) in manifest.services.iter().enumerate() {
            if !records.iter().any(|(i, _)| *i == index) {
                records.push((index, ResultRecord::failed(unit, "measurement aborted")));
            }
        }
        records.sort_by_key(|(index, _)| *index);
        let results: Vec<ResultRecord> = records.into_iter().map(|(_, r)| r).collect();

        let succeeded = results
            .iter()
            .filter(|r| r.status == ResultStatus::Success)
            .count();
        let document = ResultsDocument {
            run_id: run_id.to_string(),
            service_type: self.service_type().to_string(),
            completed_at: epoch_secs(),
            results,
        };
        self.inner().store.put_results(&document)?;

        let status = self
            .update_status(run_id, |s| {
                if s.phase.is_terminal() {
                    // Cleaned up while measuring.
                    return Ok(());
                }
                if succeeded == 0 {
                    s.fail("every unit failed measurement");
                } else {
                    s.advance(Phase::Completed)?;
                }
                Ok(())
            })
            .await?;

        if let Some(job_id) = &manifest.scheduler_trigger_id {
            if let Err(e) = self.inner().scheduler.delete(job_id).await {
                warn!(%run_id, %job_id, error = %e, "trigger delete failed");
            }
        }

        info!(
            %run_id,
            service_type = %self.service_type(),
            units = document.results.len(),
            succeeded,
            phase = %status.phase,
            "measure finished"
        );
        Ok(MeasureResponse {
            run_id: run_id.to_string(),
            status: status.phase,
            results_url: Some(results_path(run_id)),
        })
    }

    /// Cold starts, then warm requests, then the contract suite, all before
    /// `deadline`. A unit that runs out of time keeps what it measured.
    async fn measure_unit(
        &self,
        unit: &DeployedService,
        config: &BenchmarkConfig,
        deadline: Instant,
    ) -> ResultRecord {
        let Some(endpoint) = unit.endpoint.as_deref() else {
            return ResultRecord::failed(unit, "unit has no endpoint");
        };
        let inner = self.inner();
        let request_timeout = Duration::from_millis(config.request_timeout_ms);

        let cold = bench::measure_cold_starts(
            &inner.driver,
            inner.probe.as_ref(),
            inner.platform.as_ref(),
            unit,
            endpoint,
            &ColdStartParams {
                iterations: config.cold_start_iterations,
                request_timeout,
                first_idle_timeout: inner.defaults.idle_poll_timeout(),
                scale_to_zero_timeout: Duration::from_secs(config.scale_to_zero_timeout_secs),
                idle_poll_interval: inner.defaults.idle_poll_interval(),
                deadline,
            },
        )
        .await;

        let mut cut_short = None;
        if (cold.samples.len() as u32) < config.cold_start_iterations {
            cut_short = Some(format!(
                "unit deadline reached after {} of {} cold starts",
                cold.samples.len(),
                config.cold_start_iterations
            ));
        }

        let mut warm = None;
        if config.warm_requests > 0 && cut_short.is_none() {
            let params = WarmParams {
                total_requests: config.warm_requests,
                concurrency: config.warm_concurrency,
                request_timeout,
            };
            let run = bench::measure_warm(inner.driver.clone(), inner.probe.clone(), endpoint, &params);
            match tokio::time::timeout_at(deadline, run).await {
                Ok(result) => warm = Some(result),
                Err(_) => cut_short = Some("unit deadline reached during warm requests".into()),
            }
        }

        let mut contract = None;
        if cut_short.is_none() {
            let check = bench::check_contract(&inner.driver, inner.probe.as_ref(), endpoint, request_timeout);
            match tokio::time::timeout_at(deadline, check).await {
                Ok(result) => contract = result,
                Err(_) => cut_short = Some("unit deadline reached during contract checks".into()),
            }
        }
        if let Some(reason) = &cut_short {
            warn!(unit = %unit.deployment_unit_id, %reason, "unit measured partially");
        }

        let any_success =
            cold.success_count > 0 || warm.as_ref().is_some_and(|w| w.successful > 0);
        let (status, error) = if any_success {
            (ResultStatus::Success, cut_short)
        } else {
            let reason = cold
                .samples
                .iter()
                .find_map(|s| s.error.clone())
                .unwrap_or_else(|| "no successful requests".into());
            (ResultStatus::Failed, Some(format!("no successful requests: {reason}")))
        };

        ResultRecord {
            implementation: unit.implementation.clone(),
            deployment_unit_id: unit.deployment_unit_id.clone(),
            status,
            error,
            dimensions: unit.dimensions.clone(),
            cold_start: Some(cold),
            warm_requests: warm,
            contract_compliance: contract,
        }
    }
}
