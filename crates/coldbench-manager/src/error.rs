//! Manager error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The Agent answered with an error body.
    #[error("agent {service_type} rejected the call ({status} {kind}): {message}")]
    Rejected {
        service_type: String,
        status: u16,
        kind: String,
        message: String,
    },

    /// The Agent could not be reached or answered garbage.
    #[error("agent {service_type} unreachable: {reason}")]
    Unreachable { service_type: String, reason: String },

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("state store error: {0}")]
    State(#[from] coldbench_state::StateError),
}

impl From<coldbench_core::CoreError> for ManagerError {
    fn from(e: coldbench_core::CoreError) -> Self {
        ManagerError::Config(e.to_string())
    }
}

pub type ManagerResult<T> = Result<T, ManagerError>;
