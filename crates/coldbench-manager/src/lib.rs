//! coldbench-manager — the run-wide half of a benchmark.
//!
//! The Manager never interprets service-type knowledge. It finds Agents,
//! hands each one an opaque run configuration, and later gathers whatever
//! they measured into a single run document and report.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator
//!   ├── Discovery      registry/agents/* + static [[agents]] → catalog
//!   ├── run_all        POST /deploy to every Agent (bounded pool)
//!   │                  → runs/{run_id}/invocation, runs/index
//!   └── collect        GET /status until terminal or timeout,
//!                      GET /results (store fallback)
//!                      → aggregate → runs/{run_id}/run
//!
//! report::publish      run + baselines/latest → report.md, report.json
//! baseline::promote    run → baselines/latest
//! ```

pub mod aggregate;
pub mod baseline;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod orchestrator;
pub mod report;

pub use client::AgentClient;
pub use config::ManagerConfig;
pub use discovery::Discovery;
pub use error::{ManagerError, ManagerResult};
pub use orchestrator::{Orchestrator, RunRequest};
