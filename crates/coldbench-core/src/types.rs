//! Domain types shared between Agents and the Manager.
//!
//! Every document here is JSON-serialized into the object store. Each one has
//! a single creating component and a single consuming component; the only
//! document mutated in place is [`StatusRecord`], and only by the Agent that
//! owns its service type.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::stats::Statistics;

/// Opaque identifier correlating every document of one benchmark invocation.
pub type RunId = String;

/// Passthrough run configuration for one Agent. The Manager never looks inside.
pub type AgentConfigPayload = serde_json::Map<String, serde_json::Value>;

/// Generate a fresh 8-character hex run id.
pub fn new_run_id() -> RunId {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// Check that a run id is usable as an object-path segment.
pub fn validate_run_id(run_id: &str) -> CoreResult<()> {
    let ok = !run_id.is_empty()
        && run_id.len() <= 64
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(CoreError::InvalidRunId(run_id.to_string()))
    }
}

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn is_slug(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

// ── Registry ──────────────────────────────────────────────────────

/// Descriptor an Agent publishes into the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AgentDescriptor {
    pub service_type: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Base URL of the Agent's HTTP API.
    pub endpoint: String,
    #[serde(default)]
    pub implementations: Vec<ImplementationEntry>,
}

fn default_true() -> bool {
    true
}

/// One implementation an Agent can exercise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ImplementationEntry {
    pub name: String,
    #[serde(default)]
    pub status: ImplementationStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImplementationStatus {
    #[default]
    Active,
    Disabled,
}

impl AgentDescriptor {
    /// Validate the descriptor against the registry schema.
    pub fn validate(&self) -> CoreResult<()> {
        if !is_slug(&self.service_type) {
            return Err(CoreError::InvalidDescriptor(format!(
                "service_type {:?} must be a lowercase slug",
                self.service_type
            )));
        }
        let url = url::Url::parse(&self.endpoint).map_err(|e| {
            CoreError::InvalidDescriptor(format!("endpoint {:?}: {e}", self.endpoint))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(CoreError::InvalidDescriptor(format!(
                "endpoint scheme {:?} is not http(s)",
                url.scheme()
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for imp in &self.implementations {
            if !is_slug(&imp.name) {
                return Err(CoreError::InvalidDescriptor(format!(
                    "implementation name {:?} must be a lowercase slug",
                    imp.name
                )));
            }
            if !seen.insert(imp.name.as_str()) {
                return Err(CoreError::InvalidDescriptor(format!(
                    "duplicate implementation {:?}",
                    imp.name
                )));
            }
        }
        Ok(())
    }

    /// Names of implementations with `status = active`.
    pub fn active_implementations(&self) -> Vec<&str> {
        self.implementations
            .iter()
            .filter(|i| i.status == ImplementationStatus::Active)
            .map(|i| i.name.as_str())
            .collect()
    }
}

// ── Benchmark request ─────────────────────────────────────────────

/// Iteration counts, concurrency and timeouts for one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BenchmarkConfig {
    pub cold_start_iterations: u32,
    pub warm_requests: u32,
    pub warm_concurrency: u32,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// How long to wait for a unit to scale to zero between cold-start iterations.
    pub scale_to_zero_timeout_secs: u64,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            cold_start_iterations: 5,
            warm_requests: 100,
            warm_concurrency: 10,
            request_timeout_ms: 30_000,
            scale_to_zero_timeout_secs: 900,
        }
    }
}

impl BenchmarkConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if self.cold_start_iterations == 0 {
            return Err(CoreError::InvalidBenchmarkConfig(
                "cold_start_iterations must be at least 1".into(),
            ));
        }
        if self.warm_requests > 0 && self.warm_concurrency == 0 {
            return Err(CoreError::InvalidBenchmarkConfig(
                "warm_concurrency must be at least 1".into(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(CoreError::InvalidBenchmarkConfig(
                "request_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Body of `POST /deploy` and of the legacy `POST /benchmark`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BenchmarkRequest {
    pub run_id: RunId,
    #[serde(default)]
    pub benchmark_config: BenchmarkConfig,
    #[serde(default)]
    pub agent_config: AgentConfigPayload,
}

// ── Deployment manifest ───────────────────────────────────────────

/// Written once by the Deploy handler, consumed by the Measure handler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentManifest {
    pub run_id: RunId,
    pub service_type: String,
    pub deployed_at: u64,
    pub measure_delay_minutes: u64,
    pub measure_scheduled_at: u64,
    /// `None` for legacy single-call runs, which have no trigger.
    pub scheduler_trigger_id: Option<String>,
    pub benchmark_config: BenchmarkConfig,
    pub services: Vec<DeployedService>,
}

impl DeploymentManifest {
    pub fn healthy_units(&self) -> impl Iterator<Item = &DeployedService> {
        self.services
            .iter()
            .filter(|s| s.status == UnitStatus::Deployed)
    }
}

/// One deployment unit recorded in a manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeployedService {
    pub implementation: String,
    pub deployment_unit_id: String,
    pub endpoint: Option<String>,
    pub dimensions: BTreeMap<String, String>,
    pub deployed_at: u64,
    pub deploy_duration_ms: u64,
    pub status: UnitStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Deployed,
    Failed,
}

// ── Status ────────────────────────────────────────────────────────

/// Lifecycle phase of one service type within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pending,
    Deploying,
    Waiting,
    Measuring,
    Completed,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Pending => "pending",
            Phase::Deploying => "deploying",
            Phase::Waiting => "waiting",
            Phase::Measuring => "measuring",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
}

/// Mutable per-run, per-service-type status document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusRecord {
    pub run_id: RunId,
    pub service_type: String,
    pub phase: Phase,
    pub progress: Progress,
    #[serde(default)]
    pub errors: Vec<String>,
    pub updated_at: u64,
}

impl StatusRecord {
    pub fn new(run_id: &str, service_type: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            service_type: service_type.to_string(),
            phase: Phase::Pending,
            progress: Progress::default(),
            errors: Vec::new(),
            updated_at: epoch_secs(),
        }
    }

    /// Move to `next`. Phases only move forward; `failed` is reachable from
    /// any non-terminal phase and nothing leaves a terminal phase.
    pub fn advance(&mut self, next: Phase) -> CoreResult<()> {
        let legal = !self.phase.is_terminal()
            && (next == Phase::Failed || next > self.phase);
        if !legal {
            return Err(CoreError::IllegalTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        self.phase = next;
        self.updated_at = epoch_secs();
        Ok(())
    }

    /// Record an error and move to `failed` unless already terminal.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
        if !self.phase.is_terminal() {
            self.phase = Phase::Failed;
        }
        self.updated_at = epoch_secs();
    }
}

// ── Results ───────────────────────────────────────────────────────

/// Whether a unit was observed at zero instances before a cold-start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleState {
    Verified,
    NotReached,
    /// The platform cannot report instance counts.
    Unknown,
}

/// One cold-start iteration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColdStartSample {
    pub iteration: u32,
    pub idle: IdleState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColdStartResult {
    /// Latencies of successful iterations, in iteration order.
    pub measurements_ms: Vec<f64>,
    pub statistics: Option<Statistics>,
    pub samples: Vec<ColdStartSample>,
    pub success_count: u32,
    pub failure_count: u32,
    pub non_idle_starts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WarmResult {
    pub total_requests: u32,
    pub successful: u32,
    pub failed: u32,
    pub duration_ms: f64,
    pub statistics: Option<Statistics>,
    /// Requests per second over the whole warm phase.
    pub throughput: f64,
    /// Failed / total, 0.0–1.0.
    pub error_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContractFailure {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContractCompliance {
    pub total: u32,
    pub passed: u32,
    /// passed / total × 100.
    pub percentage: f64,
    #[serde(default)]
    pub failures: Vec<ContractFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Failed,
}

/// Measurement outcome of one deployment unit. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultRecord {
    pub implementation: String,
    pub deployment_unit_id: String,
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub dimensions: BTreeMap<String, String>,
    pub cold_start: Option<ColdStartResult>,
    pub warm_requests: Option<WarmResult>,
    pub contract_compliance: Option<ContractCompliance>,
}

impl ResultRecord {
    /// A failed record carrying no measurements.
    pub fn failed(unit: &DeployedService, error: impl Into<String>) -> Self {
        Self {
            implementation: unit.implementation.clone(),
            deployment_unit_id: unit.deployment_unit_id.clone(),
            status: ResultStatus::Failed,
            error: Some(error.into()),
            dimensions: unit.dimensions.clone(),
            cold_start: None,
            warm_requests: None,
            contract_compliance: None,
        }
    }

    /// Cold-start p50 in milliseconds, if any iteration succeeded.
    pub fn cold_start_p50(&self) -> Option<f64> {
        self.cold_start
            .as_ref()
            .and_then(|c| c.statistics.as_ref())
            .map(|s| s.p50)
    }

    /// Warm p50 in milliseconds, if any warm request succeeded.
    pub fn warm_p50(&self) -> Option<f64> {
        self.warm_requests
            .as_ref()
            .and_then(|w| w.statistics.as_ref())
            .map(|s| s.p50)
    }

    /// Key matching this record against the same unit in another run.
    pub fn comparison_key(&self, service_type: &str) -> String {
        let dims: Vec<String> = self
            .dimensions
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        format!("{service_type}/{}[{}]", self.implementation, dims.join(","))
    }
}

/// Everything one Agent measured for one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultsDocument {
    pub run_id: RunId,
    pub service_type: String,
    pub completed_at: u64,
    pub results: Vec<ResultRecord>,
}

// ── Manager-side documents ────────────────────────────────────────

/// The Orchestrator's record of which Agents accepted a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvocationRecord {
    pub run_id: RunId,
    pub created_at: u64,
    pub benchmark_config: BenchmarkConfig,
    pub agents: Vec<AgentInvocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentInvocation {
    pub service_type: String,
    pub endpoint: String,
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<crate::api::DeployResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Final state of one Agent within a run document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Completed,
    Failed,
    TimedOut,
    /// Deploy was rejected or never reached the Agent.
    Rejected,
    /// Accepted, but neither status nor results could be read.
    Missing,
}

impl AgentState {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentState::Completed => "completed",
            AgentState::Failed => "failed",
            AgentState::TimedOut => "timed_out",
            AgentState::Rejected => "rejected",
            AgentState::Missing => "missing",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentOutcome {
    pub service_type: String,
    pub state: AgentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    pub results: Vec<ResultRecord>,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub agents_total: u32,
    pub agents_completed: u32,
    pub agents_failed: u32,
    pub agents_timed_out: u32,
    pub agents_missing: u32,
    pub units_total: u32,
    pub units_succeeded: u32,
    pub units_failed: u32,
}

/// Aggregation of every Agent's results for one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunDocument {
    pub run_id: RunId,
    pub created_at: u64,
    pub collected_at: u64,
    pub benchmark_config: BenchmarkConfig,
    /// Keyed by service type.
    pub agents: BTreeMap<String, AgentOutcome>,
    pub summary: RunSummary,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// A pinned run used for regression comparison.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Baseline {
    pub promoted_at: u64,
    pub run: RunDocument,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunIndexEntry {
    pub run_id: RunId,
    pub created_at: u64,
    pub agents: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunIndex {
    pub runs: Vec<RunIndexEntry>,
}

impl RunIndex {
    pub fn latest(&self) -> Option<&RunIndexEntry> {
        self.runs.iter().max_by_key(|r| r.created_at)
    }
}
