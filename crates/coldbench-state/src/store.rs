//! RunStore — typed access to coldbench documents.
//!
//! Wraps an [`ObjectStore`] and owns the path layout from [`crate::paths`].
//! The store is `Clone` + `Send` + `Sync` and can be shared across tasks.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use coldbench_core::*;

use crate::error::{StateError, StateResult};
use crate::object::{ObjectStore, RedbObjectStore};
use crate::paths;

#[derive(Clone)]
pub struct RunStore {
    objects: Arc<dyn ObjectStore>,
    /// Held across the read-modify-write of `runs/index`.
    index_lock: Arc<Mutex<()>>,
}

impl RunStore {
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            objects,
            index_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Ephemeral store backed by in-memory redb (for testing).
    pub fn in_memory() -> StateResult<Self> {
        Ok(Self::new(Arc::new(RedbObjectStore::open_in_memory()?)))
    }

    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    // ── Generic JSON helpers ───────────────────────────────────────

    pub fn get_json<T: DeserializeOwned>(&self, path: &str) -> StateResult<Option<T>> {
        match self.objects.get(path)? {
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                StateError::Deserialize {
                    path: path.to_string(),
                    reason: e.to_string(),
                }
            }),
            None => Ok(None),
        }
    }

    pub fn put_json<T: Serialize>(&self, path: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| StateError::Serialize(e.to_string()))?;
        self.objects.put(path, &bytes)
    }

    /// Write only if nothing exists at `path`. Returns whether it was written.
    pub fn put_json_if_absent<T: Serialize>(&self, path: &str, value: &T) -> StateResult<bool> {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| StateError::Serialize(e.to_string()))?;
        self.objects.put_if_absent(path, &bytes)
    }

    /// Overwrite only if something exists at `path`. Returns whether it was written.
    pub fn put_json_if_present<T: Serialize>(&self, path: &str, value: &T) -> StateResult<bool> {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| StateError::Serialize(e.to_string()))?;
        self.objects.put_if_present(path, &bytes)
    }

    pub fn delete(&self, path: &str) -> StateResult<bool> {
        self.objects.delete(path)
    }

    pub fn list(&self, prefix: &str) -> StateResult<Vec<String>> {
        self.objects.list(prefix)
    }

    // ── Registry ───────────────────────────────────────────────────

    /// Publish (or replace) an Agent descriptor.
    pub fn put_descriptor(&self, descriptor: &AgentDescriptor) -> StateResult<()> {
        self.put_json(&paths::registry_entry(&descriptor.service_type), descriptor)
    }

    /// Raw registry entries as `(path, bytes)`. Parsing and schema checks
    /// belong to the caller so one bad descriptor cannot fail the listing.
    pub fn registry_entries(&self) -> StateResult<Vec<(String, Vec<u8>)>> {
        let mut entries = Vec::new();
        for path in self.objects.list(paths::REGISTRY_PREFIX)? {
            if paths::service_type_of_registry_entry(&path).is_none() {
                continue;
            }
            if let Some(bytes) = self.objects.get(&path)? {
                entries.push((path, bytes));
            }
        }
        Ok(entries)
    }

    // ── Deployment manifests ───────────────────────────────────────

    pub fn get_manifest(
        &self,
        run_id: &str,
        service_type: &str,
    ) -> StateResult<Option<DeploymentManifest>> {
        self.get_json(&paths::deployment_manifest(run_id, service_type))
    }

    /// Create the manifest. Returns false if one already exists.
    pub fn create_manifest(&self, manifest: &DeploymentManifest) -> StateResult<bool> {
        let path = paths::deployment_manifest(&manifest.run_id, &manifest.service_type);
        let created = self.put_json_if_absent(&path, manifest)?;
        debug!(%path, created, units = manifest.services.len(), "deployment manifest write");
        Ok(created)
    }

    // ── Status ─────────────────────────────────────────────────────

    pub fn get_status(&self, run_id: &str, service_type: &str) -> StateResult<Option<StatusRecord>> {
        self.get_json(&paths::status(run_id, service_type))
    }

    pub fn put_status(&self, status: &StatusRecord) -> StateResult<()> {
        self.put_json(&paths::status(&status.run_id, &status.service_type), status)
    }

    /// Create the first status record for a run. Returns false if the run
    /// was already claimed.
    pub fn claim_status(&self, status: &StatusRecord) -> StateResult<bool> {
        self.put_json_if_absent(&paths::status(&status.run_id, &status.service_type), status)
    }

    // ── Results ────────────────────────────────────────────────────

    pub fn get_results(&self, run_id: &str, service_type: &str) -> StateResult<Option<ResultsDocument>> {
        self.get_json(&paths::results(run_id, service_type))
    }

    pub fn put_results(&self, results: &ResultsDocument) -> StateResult<()> {
        self.put_json(&paths::results(&results.run_id, &results.service_type), results)
    }

    // ── Cancellation ───────────────────────────────────────────────

    pub fn mark_cancelled(&self, run_id: &str, service_type: &str) -> StateResult<()> {
        let marker = serde_json::json!({ "run_id": run_id, "cancelled_at": epoch_secs() });
        self.put_json_if_absent(&paths::cancelled(run_id, service_type), &marker)?;
        Ok(())
    }

    pub fn is_cancelled(&self, run_id: &str, service_type: &str) -> StateResult<bool> {
        Ok(self.objects.get(&paths::cancelled(run_id, service_type))?.is_some())
    }

    // ── Manager documents ──────────────────────────────────────────

    pub fn get_invocation(&self, run_id: &str) -> StateResult<Option<InvocationRecord>> {
        self.get_json(&paths::invocation(run_id))
    }

    pub fn put_invocation(&self, record: &InvocationRecord) -> StateResult<()> {
        self.put_json(&paths::invocation(&record.run_id), record)
    }

    pub fn get_run(&self, run_id: &str) -> StateResult<Option<RunDocument>> {
        self.get_json(&paths::run_document(run_id))
    }

    pub fn put_run(&self, run: &RunDocument) -> StateResult<()> {
        self.put_json(&paths::run_document(&run.run_id), run)
    }

    pub fn put_report(&self, run_id: &str, extension: &str, body: &str) -> StateResult<()> {
        self.objects.put(&paths::report(run_id, extension), body.as_bytes())
    }

    pub fn get_report(&self, run_id: &str, extension: &str) -> StateResult<Option<String>> {
        Ok(self
            .objects
            .get(&paths::report(run_id, extension))?
            .map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    pub fn get_index(&self) -> StateResult<RunIndex> {
        Ok(self.get_json(paths::RUN_INDEX)?.unwrap_or_default())
    }

    /// Add or replace a run's entry in `runs/index`. Only the Manager writes
    /// the index.
    pub fn record_in_index(&self, entry: RunIndexEntry) -> StateResult<()> {
        let _guard = self
            .index_lock
            .lock()
            .map_err(|_| StateError::Write("run index lock poisoned".into()))?;
        let mut index = self.get_index()?;
        index.runs.retain(|r| r.run_id != entry.run_id);
        index.runs.push(entry);
        self.put_json(paths::RUN_INDEX, &index)
    }

    pub fn get_baseline(&self) -> StateResult<Option<Baseline>> {
        self.get_json(paths::BASELINE_LATEST)
    }

    pub fn put_baseline(&self, baseline: &Baseline) -> StateResult<()> {
        self.put_json(paths::BASELINE_LATEST, baseline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn manifest(run_id: &str) -> DeploymentManifest {
        DeploymentManifest {
            run_id: run_id.into(),
            service_type: "svc".into(),
            deployed_at: 1000,
            measure_delay_minutes: 20,
            measure_scheduled_at: 2200,
            scheduler_trigger_id: Some("job-1".into()),
            benchmark_config: BenchmarkConfig::default(),
            services: vec![DeployedService {
                implementation: "go-gin".into(),
                deployment_unit_id: "svc-go-gin-r1-0".into(),
                endpoint: Some("http://127.0.0.1:9000".into()),
                dimensions: BTreeMap::new(),
                deployed_at: 1000,
                deploy_duration_ms: 1200,
                status: UnitStatus::Deployed,
                error: None,
            }],
        }
    }

    #[test]
    fn manifest_is_write_once() {
        let store = RunStore::in_memory().unwrap();
        assert!(store.create_manifest(&manifest("r1")).unwrap());

        let mut second = manifest("r1");
        second.deployed_at = 5000;
        assert!(!store.create_manifest(&second).unwrap());

        let stored = store.get_manifest("r1", "svc").unwrap().unwrap();
        assert_eq!(stored.deployed_at, 1000);
    }

    #[test]
    fn status_claim_then_update() {
        let store = RunStore::in_memory().unwrap();
        let mut status = StatusRecord::new("r1", "svc");
        assert!(store.claim_status(&status).unwrap());
        assert!(!store.claim_status(&status).unwrap());

        status.advance(Phase::Deploying).unwrap();
        store.put_status(&status).unwrap();
        assert_eq!(
            store.get_status("r1", "svc").unwrap().unwrap().phase,
            Phase::Deploying
        );
    }

    #[test]
    fn registry_entries_skip_foreign_paths() {
        let store = RunStore::in_memory().unwrap();
        store
            .put_descriptor(&AgentDescriptor {
                service_type: "svc".into(),
                enabled: true,
                endpoint: "http://agent:8080".into(),
                implementations: vec![],
            })
            .unwrap();
        store.objects().put("registry/agents/README", b"hi").unwrap();

        let entries = store.registry_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "registry/agents/svc.manifest");
    }

    #[test]
    fn cancellation_marker() {
        let store = RunStore::in_memory().unwrap();
        assert!(!store.is_cancelled("r1", "svc").unwrap());
        store.mark_cancelled("r1", "svc").unwrap();
        store.mark_cancelled("r1", "svc").unwrap();
        assert!(store.is_cancelled("r1", "svc").unwrap());
        assert!(!store.is_cancelled("r1", "other").unwrap());
    }

    #[test]
    fn index_replaces_existing_entry() {
        let store = RunStore::in_memory().unwrap();
        assert!(store.get_index().unwrap().runs.is_empty());
        store
            .record_in_index(RunIndexEntry { run_id: "a".into(), created_at: 1, agents: 1 })
            .unwrap();
        store
            .record_in_index(RunIndexEntry { run_id: "a".into(), created_at: 1, agents: 3 })
            .unwrap();
        let index = store.get_index().unwrap();
        assert_eq!(index.runs.len(), 1);
        assert_eq!(index.runs[0].agents, 3);
    }

    #[test]
    fn concurrent_index_writes_keep_every_run() {
        let store = RunStore::in_memory().unwrap();
        let writers: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .record_in_index(RunIndexEntry {
                            run_id: format!("run{i}"),
                            created_at: i,
                            agents: 1,
                        })
                        .unwrap();
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }
        assert_eq!(store.get_index().unwrap().runs.len(), 16);
    }

    #[test]
    fn corrupt_document_reports_path() {
        let store = RunStore::in_memory().unwrap();
        store.objects().put("runs/r1/svc/status", b"not json").unwrap();
        let err = store.get_status("r1", "svc").unwrap_err();
        assert!(err.to_string().contains("runs/r1/svc/status"));
    }
}
