//! coldbench-agent — the per-service-type half of a benchmark run.
//!
//! An Agent owns one service type. It deploys that type's implementations
//! (one unit per matrix entry), schedules a one-shot trigger to come back
//! after the platform has scaled the units to zero, measures cold starts,
//! warm latency and contract compliance, and tears everything down on
//! cleanup. All state between phases lives in the object store.
//!
//! # Architecture
//!
//! ```text
//! Agent
//!   ├── deploy   → Platform::deploy per unit, manifest, TriggerScheduler::create
//!   ├── measure  → bench::{cold start, warm, contract} per unit, results
//!   ├── cleanup  → tombstone, Platform::delete, TriggerScheduler::delete
//!   └── status / results / health / implementations
//!
//! ServiceProbe   what a valid request and response look like
//! Platform       where units run (static endpoints or a CLI wrapper)
//! HttpDriver     timed HTTP requests (TTFB and total)
//! ```

pub mod agent;
pub mod bench;
pub mod config;
pub mod driver;
pub mod error;
pub mod matrix;
pub mod measure;
pub mod platform;
pub mod probe;

mod benchmark;
mod cleanup;
mod deploy;
mod status;

#[cfg(test)]
mod testutil;

pub use agent::{Agent, AgentParts};
pub use config::AgentConfig;
pub use error::{AgentError, AgentResult};
pub use measure::{MeasureJob, MeasurePlan};
