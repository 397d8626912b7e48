//! Wire bodies of the Agent HTTP API, shared by the Agent server and the
//! Manager's client.

use serde::{Deserialize, Serialize};

use crate::types::{Phase, RunId};

/// Body of `POST /measure` and `POST /cleanup`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRef {
    pub run_id: RunId,
}

/// Response of `POST /deploy`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeployResponse {
    pub run_id: RunId,
    pub status: Phase,
    pub services_to_deploy: u32,
    pub measure_scheduled_at: u64,
    pub scheduler_job_id: Option<String>,
}

/// Response of `POST /measure` and the legacy `POST /benchmark`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeasureResponse {
    pub run_id: RunId,
    pub status: Phase,
    pub results_url: Option<String>,
}

/// Response of `POST /cleanup`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CleanupResponse {
    pub run_id: RunId,
    pub services_deleted: u32,
    pub scheduler_job_deleted: bool,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub service_type: String,
    pub version: String,
}

/// Response of `GET /implementations`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImplementationsResponse {
    pub service_type: String,
    pub implementations: Vec<crate::types::ImplementationEntry>,
}

/// Error body returned with any non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    /// Machine-readable class: `config`, `duplicate`, `not_found`,
    /// `cancelled`, `transient`, `unauthorized`, `internal`.
    pub kind: String,
    pub error: String,
}

/// Path of the results document for a run, relative to the Agent base URL.
pub fn results_path(run_id: &str) -> String {
    format!("/results/{run_id}")
}
