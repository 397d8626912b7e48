//! Object-path layout.
//!
//! ```text
//! registry/agents/{service_type}.manifest
//! runs/{run_id}/{service_type}/{deployment-manifest|status|results|cancelled}
//! runs/{run_id}/{invocation|run|report.md|report.json}
//! runs/index
//! baselines/latest
//! triggers/{job_id}
//! ```

pub const REGISTRY_PREFIX: &str = "registry/agents/";
pub const RUN_INDEX: &str = "runs/index";
pub const BASELINE_LATEST: &str = "baselines/latest";
pub const TRIGGERS_PREFIX: &str = "triggers/";

const MANIFEST_SUFFIX: &str = ".manifest";

pub fn registry_entry(service_type: &str) -> String {
    format!("{REGISTRY_PREFIX}{service_type}{MANIFEST_SUFFIX}")
}

/// Recover the service type from a registry path, if it is one.
pub fn service_type_of_registry_entry(path: &str) -> Option<&str> {
    path.strip_prefix(REGISTRY_PREFIX)?
        .strip_suffix(MANIFEST_SUFFIX)
        .filter(|s| !s.is_empty() && !s.contains('/'))
}

pub fn deployment_manifest(run_id: &str, service_type: &str) -> String {
    format!("runs/{run_id}/{service_type}/deployment-manifest")
}

pub fn status(run_id: &str, service_type: &str) -> String {
    format!("runs/{run_id}/{service_type}/status")
}

pub fn results(run_id: &str, service_type: &str) -> String {
    format!("runs/{run_id}/{service_type}/results")
}

pub fn cancelled(run_id: &str, service_type: &str) -> String {
    format!("runs/{run_id}/{service_type}/cancelled")
}

pub fn invocation(run_id: &str) -> String {
    format!("runs/{run_id}/invocation")
}

pub fn run_document(run_id: &str) -> String {
    format!("runs/{run_id}/run")
}

pub fn report(run_id: &str, extension: &str) -> String {
    format!("runs/{run_id}/report.{extension}")
}

pub fn trigger(job_id: &str) -> String {
    format!("{TRIGGERS_PREFIX}{job_id}")
}
