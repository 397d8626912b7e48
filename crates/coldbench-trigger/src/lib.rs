//! coldbench-trigger — one-shot, time-delayed callbacks.
//!
//! The Deploy phase ends by scheduling a single call to the Agent's own
//! `/measure` endpoint. Nothing waits in memory for that call: the job is a
//! document in the object store, and a [`TriggerDispatcher`] (embedded in
//! the Agent or run standalone) fires it once its time has come.
//!
//! ```text
//! DeployHandler ──create──▶ triggers/{job_id}   (pending)
//!                                  │
//!             TriggerDispatcher ───┘ poll, POST {run_id} to target
//!                                  │
//!                                  ▼
//!                          triggers/{job_id}   (fired)
//!                                  │
//! MeasureHandler ──delete──────────┘
//! ```

pub mod dispatcher;
pub mod error;
pub mod job;
pub mod scheduler;

pub use dispatcher::{DispatchConfig, TriggerDispatcher};
pub use error::{TriggerError, TriggerResult};
pub use job::{JobState, TriggerJob, TriggerSpec};
pub use scheduler::{StoreScheduler, TriggerScheduler};
