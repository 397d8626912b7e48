//! Agent error types.
//!
//! Variants follow the failure classes of a run: configuration errors are
//! rejected synchronously and never retried, transient errors are retried
//! once inside the Deploy handler, protocol errors (`NotFound`) are fatal
//! for the run. Measurement errors never surface here; they are recorded
//! in the unit's result instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("run {0} is already claimed")]
    Duplicate(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("run {0} was cancelled")]
    Cancelled(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("state store error: {0}")]
    State(#[from] coldbench_state::StateError),
}

impl AgentError {
    /// Machine-readable class used in HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Config(_) => "config",
            AgentError::Duplicate(_) => "duplicate",
            AgentError::NotFound(_) => "not_found",
            AgentError::Cancelled(_) => "cancelled",
            AgentError::Transient(_) => "transient",
            AgentError::Unauthorized => "unauthorized",
            AgentError::State(_) => "internal",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, AgentError::Transient(_))
    }
}

impl From<coldbench_core::CoreError> for AgentError {
    fn from(e: coldbench_core::CoreError) -> Self {
        AgentError::Config(e.to_string())
    }
}

impl From<coldbench_trigger::TriggerError> for AgentError {
    fn from(e: coldbench_trigger::TriggerError) -> Self {
        match e {
            coldbench_trigger::TriggerError::Invalid(msg) => AgentError::Config(msg),
            other => AgentError::Transient(other.to_string()),
        }
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
