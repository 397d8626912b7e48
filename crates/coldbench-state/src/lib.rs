//! coldbench-state — durable object store for coldbench.
//!
//! Every piece of cross-phase state (agent registry, deployment manifests,
//! status records, results, run documents, baselines, pending triggers)
//! lives here; no process keeps run state in memory across the
//! scale-to-zero wait.
//!
//! # Architecture
//!
//! ```text
//! RunStore (typed documents, path layout)
//!   └── Arc<dyn ObjectStore>
//!         ├── RedbObjectStore  (single file, or in-memory for tests)
//!         └── FsObjectStore    (directory tree, shareable between processes)
//! ```
//!
//! Values are JSON-serialized domain types from `coldbench-core`. The only
//! concurrency primitive relied upon is [`ObjectStore::put_if_absent`].

pub mod config;
pub mod error;
pub mod object;
pub mod paths;
pub mod store;
pub mod tables;

pub use config::{StoreBackend, StoreConfig};
pub use error::{StateError, StateResult};
pub use object::{FsObjectStore, ObjectStore, RedbObjectStore};
pub use store::RunStore;
