//! Persisted trigger jobs.

use serde::{Deserialize, Serialize};

use coldbench_core::RunId;

use crate::error::{TriggerError, TriggerResult};

/// What a caller asks to be scheduled.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerSpec {
    /// Service type of the Agent that owns the job.
    pub owner: String,
    pub run_id: RunId,
    /// Absolute URL that receives `POST {"run_id": ...}`.
    pub target: String,
    /// Unix seconds at which the job becomes due.
    pub fire_at: u64,
}

impl TriggerSpec {
    /// Deterministic job id, so a retried create lands on the same job.
    pub fn job_id(&self) -> String {
        format!("measure-{}-{}", self.owner, self.run_id)
    }

    pub fn validate(&self) -> TriggerResult<()> {
        if self.owner.is_empty() || self.owner.contains('/') {
            return Err(TriggerError::Invalid(format!("owner {:?}", self.owner)));
        }
        coldbench_core::validate_run_id(&self.run_id)
            .map_err(|e| TriggerError::Invalid(e.to_string()))?;
        if !(self.target.starts_with("http://") || self.target.starts_with("https://")) {
            return Err(TriggerError::Invalid(format!(
                "target {:?} is not an http(s) URL",
                self.target
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    /// Delivered to the target. Never fired again.
    Fired,
    /// Gave up after repeated delivery failures.
    Failed,
}

/// A one-shot trigger as stored under `triggers/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerJob {
    pub id: String,
    pub owner: String,
    pub run_id: RunId,
    pub target: String,
    pub fire_at: u64,
    pub created_at: u64,
    pub state: JobState,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fired_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl TriggerJob {
    pub fn from_spec(spec: &TriggerSpec, now: u64) -> Self {
        Self {
            id: spec.job_id(),
            owner: spec.owner.clone(),
            run_id: spec.run_id.clone(),
            target: spec.target.clone(),
            fire_at: spec.fire_at,
            created_at: now,
            state: JobState::Pending,
            attempts: 0,
            fired_at: None,
            last_error: None,
        }
    }

    pub fn is_due(&self, now: u64) -> bool {
        self.state == JobState::Pending && self.fire_at <= now
    }
}
