//! Discovery: the catalog of enabled Agents.
//!
//! The registry is re-read on every call. A descriptor that fails to parse
//! or validate is logged and skipped. Listing is bounded by a timeout; on
//! timeout or store error the last good catalog is returned, or an empty
//! one if there is none yet.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, info, warn};

use coldbench_core::AgentDescriptor;
use coldbench_state::{RunStore, paths};

pub struct Discovery {
    store: RunStore,
    static_agents: Vec<AgentDescriptor>,
    timeout: Duration,
    cache: Mutex<Option<Vec<AgentDescriptor>>>,
}

impl Discovery {
    pub fn new(store: RunStore, static_agents: Vec<AgentDescriptor>, timeout: Duration) -> Self {
        Self {
            store,
            static_agents,
            timeout,
            cache: Mutex::new(None),
        }
    }

    /// Enabled Agents, sorted by service type.
    pub async fn discover(&self) -> Vec<AgentDescriptor> {
        let store = self.store.clone();
        let listing = tokio::time::timeout(
            self.timeout,
            tokio::task::spawn_blocking(move || store.registry_entries()),
        )
        .await;

        let entries = match listing {
            Ok(Ok(Ok(entries))) => entries,
            Ok(Ok(Err(e))) => return self.fallback(&format!("registry listing failed: {e}")),
            Ok(Err(e)) => return self.fallback(&format!("registry task failed: {e}")),
            Err(_) => return self.fallback("registry listing timed out"),
        };

        let (registry, rejected) = parse_registry(&entries);
        for reason in &rejected {
            warn!(%reason, "registry descriptor rejected");
        }
        let catalog = merge(&self.static_agents, registry);
        info!(
            agents = catalog.len(),
            rejected = rejected.len(),
            "discovery complete"
        );
        if let Ok(mut cache) = self.cache.lock() {
            *cache = Some(catalog.clone());
        }
        catalog
    }

    fn fallback(&self, reason: &str) -> Vec<AgentDescriptor> {
        let cached = self.cache.lock().ok().and_then(|c| c.clone());
        match cached {
            Some(catalog) => {
                warn!(%reason, agents = catalog.len(), "using cached agent catalog");
                catalog
            }
            None => {
                warn!(%reason, "no cached agent catalog, discovering zero agents");
                Vec::new()
            }
        }
    }
}

/// Parse raw registry entries. Returns the valid descriptors and one
/// message per rejected entry.
pub fn parse_registry(entries: &[(String, Vec<u8>)]) -> (Vec<AgentDescriptor>, Vec<String>) {
    let mut valid = Vec::new();
    let mut rejected = Vec::new();
    for (path, bytes) in entries {
        let descriptor: AgentDescriptor = match serde_json::from_slice(bytes) {
            Ok(d) => d,
            Err(e) => {
                rejected.push(format!("{path}: {e}"));
                continue;
            }
        };
        if let Err(e) = descriptor.validate() {
            rejected.push(format!("{path}: {e}"));
            continue;
        }
        if paths::service_type_of_registry_entry(path) != Some(descriptor.service_type.as_str()) {
            rejected.push(format!(
                "{path}: service_type {:?} does not match its registry path",
                descriptor.service_type
            ));
            continue;
        }
        valid.push(descriptor);
    }
    (valid, rejected)
}

/// Static entries overlaid by registry entries of the same service type,
/// keeping only enabled Agents.
fn merge(static_agents: &[AgentDescriptor], registry: Vec<AgentDescriptor>) -> Vec<AgentDescriptor> {
    let mut by_type: BTreeMap<String, AgentDescriptor> = static_agents
        .iter()
        .map(|d| (d.service_type.clone(), d.clone()))
        .collect();
    for descriptor in registry {
        if by_type.contains_key(&descriptor.service_type) {
            debug!(service_type = %descriptor.service_type, "registry overrides static agent");
        }
        by_type.insert(descriptor.service_type.clone(), descriptor);
    }
    by_type.into_values().filter(|d| d.enabled).collect()
}
