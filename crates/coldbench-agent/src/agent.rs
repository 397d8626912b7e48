//! The Agent: one per service type, owning every run document under
//! `runs/{run_id}/{service_type}/`.

use std::sync::Arc;

use tokio::sync::Mutex;

use coldbench_core::*;
use coldbench_state::RunStore;
use coldbench_trigger::{StoreScheduler, TriggerScheduler};

use crate::config::{AgentConfig, AgentDefaults};
use crate::driver::HttpDriver;
use crate::error::{AgentError, AgentResult};
use crate::platform::{self, Platform};
use crate::probe::{self, ServiceProbe};

/// Collaborators an [`Agent`] is assembled from.
pub struct AgentParts {
    pub service_type: String,
    pub implementations: Vec<ImplementationEntry>,
    pub defaults: AgentDefaults,
    /// Target URL of the Agent's own measure trigger.
    pub measure_url: String,
    pub store: RunStore,
    pub platform: Arc<dyn Platform>,
    pub probe: Arc<dyn ServiceProbe>,
    pub scheduler: Arc<dyn TriggerScheduler>,
}

#[derive(Clone)]
pub struct Agent {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) service_type: String,
    pub(crate) implementations: Vec<ImplementationEntry>,
    pub(crate) defaults: AgentDefaults,
    pub(crate) measure_url: String,
    pub(crate) store: RunStore,
    pub(crate) platform: Arc<dyn Platform>,
    pub(crate) probe: Arc<dyn ServiceProbe>,
    pub(crate) scheduler: Arc<dyn TriggerScheduler>,
    pub(crate) driver: HttpDriver,
    /// Serializes read-modify-write of status records within this process.
    pub(crate) status_lock: Mutex<()>,
}

impl Agent {
    pub fn from_parts(parts: AgentParts) -> AgentResult<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                service_type: parts.service_type,
                implementations: parts.implementations,
                defaults: parts.defaults,
                measure_url: parts.measure_url,
                store: parts.store,
                platform: parts.platform,
                probe: parts.probe,
                scheduler: parts.scheduler,
                driver: HttpDriver::new()?,
                status_lock: Mutex::new(()),
            }),
        })
    }

    /// Build an Agent from its config file, scheduling triggers in `store`.
    pub fn from_config(config: &AgentConfig, store: RunStore) -> AgentResult<Self> {
        Self::from_parts(AgentParts {
            service_type: config.service_type.clone(),
            implementations: config.implementations.clone(),
            defaults: config.defaults.clone(),
            measure_url: config.measure_url(),
            probe: probe::from_config(&config.service_type, &config.probe)?,
            platform: platform::from_config(&config.platform),
            scheduler: Arc::new(StoreScheduler::new(store.clone())),
            store,
        })
    }

    pub(crate) fn inner(&self) -> &Inner {
        &self.inner
    }

    pub fn service_type(&self) -> &str {
        &self.inner.service_type
    }

    pub fn store(&self) -> &RunStore {
        &self.inner.store
    }

    pub(crate) fn active_implementations(&self) -> Vec<String> {
        self.inner
            .implementations
            .iter()
            .filter(|i| i.status == ImplementationStatus::Active)
            .map(|i| i.name.clone())
            .collect()
    }

    // ── Introspection ──────────────────────────────────────────────

    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "ok".into(),
            service_type: self.inner.service_type.clone(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }

    pub fn implementations(&self) -> ImplementationsResponse {
        ImplementationsResponse {
            service_type: self.inner.service_type.clone(),
            implementations: self.inner.implementations.clone(),
        }
    }

    /// The descriptor this Agent publishes into the registry.
    pub fn descriptor(&self, endpoint: &str) -> AgentDescriptor {
        AgentDescriptor {
            service_type: self.inner.service_type.clone(),
            enabled: true,
            endpoint: endpoint.to_string(),
            implementations: self.inner.implementations.clone(),
        }
    }

    // ── Run documents ──────────────────────────────────────────────

    pub fn status(&self, run_id: &str) -> AgentResult<StatusRecord> {
        validate_run_id(run_id)?;
        self.inner
            .store
            .get_status(run_id, &self.inner.service_type)?
            .ok_or_else(|| AgentError::NotFound(format!("status for run {run_id}")))
    }

    pub fn results(&self, run_id: &str) -> AgentResult<ResultsDocument> {
        validate_run_id(run_id)?;
        self.inner
            .store
            .get_results(run_id, &self.inner.service_type)?
            .ok_or_else(|| AgentError::NotFound(format!("results for run {run_id}")))
    }
}
