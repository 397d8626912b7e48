//! Orchestrator: fan a run out to every Agent, then gather what they measured.
//!
//! [`Orchestrator::run_all`] returns as soon as every Deploy call has been
//! answered; measurement happens later, driven by each Agent's own trigger.
//! [`Orchestrator::collect`] is a separate call that may run in another
//! process, hours later: it only needs the invocation record in the store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use coldbench_core::*;
use coldbench_state::RunStore;

use crate::aggregate::{self, Collected};
use crate::client::AgentClient;
use crate::config::{ManagerConfig, OrchestratorConfig};
use crate::discovery::Discovery;
use crate::error::{ManagerError, ManagerResult};

/// Inputs of one benchmark invocation.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Overrides the configured defaults.
    pub benchmark_config: Option<BenchmarkConfig>,
    /// Passthrough run configuration, keyed by service type.
    pub agent_configs: BTreeMap<String, AgentConfigPayload>,
    /// Restrict the run to these service types.
    pub only: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupOutcome {
    pub service_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<CleanupResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct Orchestrator {
    store: RunStore,
    discovery: Discovery,
    client: AgentClient,
    config: OrchestratorConfig,
    defaults: BenchmarkConfig,
}

impl Orchestrator {
    pub fn new(
        store: RunStore,
        discovery: Discovery,
        client: AgentClient,
        config: OrchestratorConfig,
        defaults: BenchmarkConfig,
    ) -> Self {
        Self {
            store,
            discovery,
            client,
            config,
            defaults,
        }
    }

    pub fn from_config(config: &ManagerConfig, store: RunStore) -> ManagerResult<Self> {
        let discovery = Discovery::new(
            store.clone(),
            config.agents.clone(),
            config.orchestrator.discovery_timeout(),
        );
        let client = AgentClient::new(
            config.resolve_token(),
            config.orchestrator.deploy_call_timeout(),
        )?;
        Ok(Self::new(
            store,
            discovery,
            client,
            config.orchestrator.clone(),
            config.benchmark.clone(),
        ))
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    // ── RunAll ─────────────────────────────────────────────────────

    /// Generate a run id and call Deploy on every discovered Agent.
    pub async fn run_all(&self, request: RunRequest) -> ManagerResult<InvocationRecord> {
        let benchmark_config = request
            .benchmark_config
            .unwrap_or_else(|| self.defaults.clone());
        benchmark_config.validate()?;

        let mut agents = self.discovery.discover().await;
        if let Some(only) = &request.only {
            agents.retain(|a| only.contains(&a.service_type));
        }
        for service_type in request.agent_configs.keys() {
            if !agents.iter().any(|a| &a.service_type == service_type) {
                warn!(%service_type, "run configuration given for an agent that is not invoked");
            }
        }

        let run_id = new_run_id();
        let created_at = epoch_secs();
        info!(%run_id, agents = agents.len(), "run started");

        let semaphore = Arc::new(Semaphore::new(self.config.parallelism));
        let mut set = JoinSet::new();
        for agent in agents {
            let request = BenchmarkRequest {
                run_id: run_id.clone(),
                benchmark_config: benchmark_config.clone(),
                agent_config: request
                    .agent_configs
                    .get(&agent.service_type)
                    .cloned()
                    .unwrap_or_default(),
            };
            let client = self.client.clone();
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                invoke(&client, agent, &request).await
            });
        }

        let mut invoked = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(done) => invoked.push(done),
                Err(e) => error!(%run_id, error = %e, "deploy task panicked"),
            }
        }
        invoked.sort_by(|a, b| a.service_type.cmp(&b.service_type));

        let record = InvocationRecord {
            run_id: run_id.clone(),
            created_at,
            benchmark_config,
            agents: invoked,
        };
        self.store.put_invocation(&record)?;
        self.store.record_in_index(RunIndexEntry {
            run_id: run_id.clone(),
            created_at,
            agents: record.agents.len() as u32,
        })?;

        let accepted = record.agents.iter().filter(|a| a.accepted).count();
        info!(%run_id, accepted, rejected = record.agents.len() - accepted, "run deployed");
        Ok(record)
    }

    // ── Collect ────────────────────────────────────────────────────

    /// Wait for every accepted Agent to finish (or the collection timeout),
    /// then aggregate and persist the run document.
    pub async fn collect(&self, run_id: &str) -> ManagerResult<RunDocument> {
        validate_run_id(run_id)?;
        let invocation = self
            .store
            .get_invocation(run_id)?
            .ok_or_else(|| ManagerError::NotFound(format!("invocation record for run {run_id}")))?;

        let deadline = Instant::now() + self.config.collect_timeout();
        let poll_interval = self.config.poll_interval();
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism));
        let mut set = JoinSet::new();
        for invoked in invocation.agents.iter().filter(|a| a.accepted) {
            let poller = Poller {
                client: self.client.clone(),
                store: self.store.clone(),
                agent: target(invoked),
                run_id: run_id.to_string(),
                deadline,
                poll_interval,
            };
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                poller.collect().await
            });
        }

        let mut collected = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(done) => collected.push(done),
                Err(e) => error!(%run_id, error = %e, "collect task panicked"),
            }
        }

        let run = aggregate::aggregate(&invocation, collected, epoch_secs());
        self.store.put_run(&run)?;
        info!(
            %run_id,
            completed = run.summary.agents_completed,
            failed = run.summary.agents_failed,
            timed_out = run.summary.agents_timed_out,
            missing = run.summary.agents_missing,
            "run collected"
        );
        Ok(run)
    }

    // ── Cleanup ────────────────────────────────────────────────────

    /// Call Cleanup on every Agent that accepted the run.
    pub async fn cleanup(&self, run_id: &str) -> ManagerResult<Vec<CleanupOutcome>> {
        validate_run_id(run_id)?;
        let invocation = self
            .store
            .get_invocation(run_id)?
            .ok_or_else(|| ManagerError::NotFound(format!("invocation record for run {run_id}")))?;

        let mut outcomes = Vec::new();
        for invoked in invocation.agents.iter().filter(|a| a.accepted) {
            let outcome = match self.client.cleanup(&target(invoked), run_id).await {
                Ok(response) => CleanupOutcome {
                    service_type: invoked.service_type.clone(),
                    response: Some(response),
                    error: None,
                },
                Err(e) => {
                    warn!(%run_id, service_type = %invoked.service_type, error = %e, "cleanup failed");
                    CleanupOutcome {
                        service_type: invoked.service_type.clone(),
                        response: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

async fn invoke(
    client: &AgentClient,
    agent: AgentDescriptor,
    request: &BenchmarkRequest,
) -> AgentInvocation {
    match client.deploy(&agent, request).await {
        Ok(response) => {
            info!(
                run_id = %request.run_id,
                service_type = %agent.service_type,
                units = response.services_to_deploy,
                phase = %response.status,
                "deploy accepted"
            );
            AgentInvocation {
                service_type: agent.service_type,
                endpoint: agent.endpoint,
                accepted: true,
                response: Some(response),
                error: None,
            }
        }
        Err(e) => {
            warn!(run_id = %request.run_id, service_type = %agent.service_type, error = %e, "deploy rejected");
            AgentInvocation {
                service_type: agent.service_type,
                endpoint: agent.endpoint,
                accepted: false,
                response: None,
                error: Some(e.to_string()),
            }
        }
    }
}

fn target(invoked: &AgentInvocation) -> AgentDescriptor {
    AgentDescriptor {
        service_type: invoked.service_type.clone(),
        enabled: true,
        endpoint: invoked.endpoint.clone(),
        implementations: Vec::new(),
    }
}

/// Status polling for one Agent. Reads go to the Agent first and to the
/// shared store when the Agent cannot be reached.
struct Poller {
    client: AgentClient,
    store: RunStore,
    agent: AgentDescriptor,
    run_id: String,
    deadline: Instant,
    poll_interval: Duration,
}

impl Poller {
    async fn collect(self) -> Collected {
        let service_type = self.agent.service_type.clone();
        let mut collected = Collected {
            service_type: service_type.clone(),
            ..Collected::default()
        };

        let mut last_error = None;
        loop {
            match self.read_status().await {
                Ok(Some(status)) => {
                    let terminal = status.phase.is_terminal();
                    debug!(run_id = %self.run_id, %service_type, phase = %status.phase, "status polled");
                    collected.status = Some(status);
                    last_error = None;
                    if terminal {
                        break;
                    }
                }
                Ok(None) => last_error = Some("no status record".to_string()),
                Err(e) => last_error = Some(e.to_string()),
            }

            let now = Instant::now();
            if now >= self.deadline {
                collected.timed_out = collected.status.is_some();
                warn!(run_id = %self.run_id, %service_type, "collection timed out");
                break;
            }
            tokio::time::sleep(self.poll_interval.min(self.deadline - now)).await;
        }
        if let Some(e) = last_error {
            collected.errors.push(e);
        }

        if !collected.timed_out {
            collected.results = self.read_results().await;
            let completed = collected
                .status
                .as_ref()
                .is_some_and(|s| s.phase == Phase::Completed);
            if completed && collected.results.is_none() {
                collected.errors.push("completed without a results document".into());
            }
        }
        collected
    }

    async fn read_status(&self) -> ManagerResult<Option<StatusRecord>> {
        match self.client.status(&self.agent, &self.run_id).await {
            Ok(status) => Ok(Some(status)),
            Err(ManagerError::Rejected { status: 404, .. }) => Ok(None),
            Err(e) => {
                debug!(run_id = %self.run_id, service_type = %self.agent.service_type, error = %e, "status call failed, reading store");
                match self.store.get_status(&self.run_id, &self.agent.service_type)? {
                    Some(status) => Ok(Some(status)),
                    None => Err(e),
                }
            }
        }
    }

    async fn read_results(&self) -> Option<ResultsDocument> {
        match self.client.results(&self.agent, &self.run_id).await {
            Ok(results) => Some(results),
            Err(e) => {
                debug!(run_id = %self.run_id, service_type = %self.agent.service_type, error = %e, "results call failed, reading store");
                self.store
                    .get_results(&self.run_id, &self.agent.service_type)
                    .ok()
                    .flatten()
            }
        }
    }
}
