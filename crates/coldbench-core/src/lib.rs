//! coldbench-core — shared vocabulary for the coldbench system.
//!
//! Holds the documents that cross process boundaries (agent descriptors,
//! benchmark requests, deployment manifests, status and result records,
//! run documents, baselines) together with the latency statistics used to
//! summarize measurements. Nothing in this crate performs I/O.
//!
//! Service-type specific shapes never appear here: an Agent's run
//! configuration travels through the Manager as an opaque JSON map
//! ([`AgentConfigPayload`]) and is only interpreted by the Agent that
//! receives it.

pub mod api;
pub mod error;
pub mod stats;
pub mod types;

pub use api::*;
pub use error::{CoreError, CoreResult};
pub use stats::Statistics;
pub use types::*;
