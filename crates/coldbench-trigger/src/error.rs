//! Trigger error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("invalid trigger: {0}")]
    Invalid(String),

    #[error("dispatch to {target} failed: {reason}")]
    Dispatch { target: String, reason: String },

    #[error("state store error: {0}")]
    State(#[from] coldbench_state::StateError),
}

pub type TriggerResult<T> = Result<T, TriggerError>;
