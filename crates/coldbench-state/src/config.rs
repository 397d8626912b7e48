//! Store selection shared by the Agent and Manager config documents.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StateResult;
use crate::object::{FsObjectStore, ObjectStore, RedbObjectStore};
use crate::store::RunStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Redb,
    Fs,
}

/// `[store]` table of a config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Database file for `redb`, root directory for `fs`.
    pub path: PathBuf,
}

impl StoreConfig {
    pub fn open(&self) -> StateResult<RunStore> {
        let objects: Arc<dyn ObjectStore> = match self.backend {
            StoreBackend::Redb => Arc::new(RedbObjectStore::open(&self.path)?),
            StoreBackend::Fs => Arc::new(FsObjectStore::open(&self.path)?),
        };
        Ok(RunStore::new(objects))
    }
}
