//! Error types for document validation.

use thiserror::Error;

/// Result type alias for validation operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while validating shared documents.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("invalid benchmark config: {0}")]
    InvalidBenchmarkConfig(String),

    #[error("invalid run id: {0:?}")]
    InvalidRunId(String),

    #[error("illegal phase transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },
}
