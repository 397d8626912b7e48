//! Manager commands. Each opens the store named by `manager.toml`, does
//! one thing, and prints its result on stdout.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, bail};
use tracing::info;

use coldbench_core::{AgentConfigPayload, AgentDescriptor};
use coldbench_manager::{Discovery, ManagerConfig, Orchestrator, RunRequest, baseline, report as reporter};
use coldbench_state::{RunStore, paths};

/// Command-line overrides of `[benchmark]`.
pub struct Overrides {
    pub iterations: Option<u32>,
    pub warm_requests: Option<u32>,
    pub scale_to_zero_secs: Option<u64>,
}

fn load(config_path: &Path) -> anyhow::Result<(ManagerConfig, RunStore)> {
    let config = ManagerConfig::from_file(config_path)?;
    let store = config
        .store
        .open()
        .with_context(|| format!("opening store at {}", config.store.path.display()))?;
    Ok((config, store))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse `service_type=path.json` pairs into run configuration payloads.
fn agent_configs(pairs: &[String]) -> anyhow::Result<BTreeMap<String, AgentConfigPayload>> {
    let mut configs = BTreeMap::new();
    for pair in pairs {
        let Some((service_type, path)) = pair.split_once('=') else {
            bail!("--agent-config expects SERVICE=FILE, got {pair:?}");
        };
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        let payload: AgentConfigPayload = serde_json::from_str(&content)
            .with_context(|| format!("{path} is not a JSON object"))?;
        configs.insert(service_type.to_string(), payload);
    }
    Ok(configs)
}

// ── Runs ───────────────────────────────────────────────────────

pub async fn run(
    config_path: &Path,
    pairs: &[String],
    only: Vec<String>,
    overrides: Overrides,
) -> anyhow::Result<()> {
    let (config, store) = load(config_path)?;

    let mut benchmark = config.benchmark.clone();
    if let Some(n) = overrides.iterations {
        benchmark.cold_start_iterations = n;
    }
    if let Some(n) = overrides.warm_requests {
        benchmark.warm_requests = n;
    }
    if let Some(secs) = overrides.scale_to_zero_secs {
        benchmark.scale_to_zero_timeout_secs = secs;
    }
    benchmark.validate()?;

    let request = RunRequest {
        benchmark_config: Some(benchmark),
        agent_configs: agent_configs(pairs)?,
        only: (!only.is_empty()).then_some(only),
    };
    let orchestrator = Orchestrator::from_config(&config, store)?;
    let invocation = orchestrator.run_all(request).await?;

    let accepted = invocation.agents.iter().filter(|a| a.accepted).count();
    info!(run_id = %invocation.run_id, accepted, agents = invocation.agents.len(), "run started");
    print_json(&invocation)
}

pub async fn collect(config_path: &Path, run_id: &str, with_report: bool) -> anyhow::Result<()> {
    let (config, store) = load(config_path)?;
    let orchestrator = Orchestrator::from_config(&config, store.clone())?;
    let run = orchestrator.collect(run_id).await?;
    if with_report {
        reporter::publish(&store, run_id, &config.report)?;
    }
    print_json(&run.summary)
}

pub async fn cleanup(config_path: &Path, run_id: &str) -> anyhow::Result<()> {
    let (config, store) = load(config_path)?;
    let orchestrator = Orchestrator::from_config(&config, store)?;
    let outcomes = orchestrator.cleanup(run_id).await?;
    print_json(&outcomes)
}

// ── Reports and baselines ──────────────────────────────────────

pub fn report(
    config_path: &Path,
    run_id: Option<String>,
    latest: bool,
    json: bool,
) -> anyhow::Result<()> {
    let (config, store) = load(config_path)?;
    let run_id = match run_id {
        Some(id) => id,
        None if latest => match store.get_index()?.latest() {
            Some(entry) => entry.run_id.clone(),
            None => bail!("no runs recorded"),
        },
        None => bail!("a run id or --latest is required"),
    };

    let report = reporter::publish(&store, &run_id, &config.report)?;
    if json {
        print_json(&report)
    } else {
        print!("{}", reporter::render_markdown(&report));
        Ok(())
    }
}

pub fn promote(config_path: &Path, run_id: &str) -> anyhow::Result<()> {
    let (_, store) = load(config_path)?;
    let pinned = baseline::promote(&store, run_id)?;
    println!("{} {}", pinned.run.run_id, pinned.promoted_at);
    Ok(())
}

pub fn show_baseline(config_path: &Path) -> anyhow::Result<()> {
    let (_, store) = load(config_path)?;
    match store.get_baseline()? {
        Some(pinned) => {
            println!("{} {}", pinned.run.run_id, pinned.promoted_at);
            Ok(())
        }
        None => bail!("no baseline promoted"),
    }
}

// ── Registry ───────────────────────────────────────────────────

pub fn registry_put(config_path: &Path, descriptor_path: &Path) -> anyhow::Result<()> {
    let (_, store) = load(config_path)?;
    let content = std::fs::read_to_string(descriptor_path)
        .with_context(|| format!("reading {}", descriptor_path.display()))?;
    let descriptor: AgentDescriptor = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", descriptor_path.display()))?;
    descriptor.validate()?;
    store.put_descriptor(&descriptor)?;
    info!(service_type = %descriptor.service_type, "descriptor published");
    println!("{}", paths::registry_entry(&descriptor.service_type));
    Ok(())
}

pub fn registry_remove(config_path: &Path, service_type: &str) -> anyhow::Result<()> {
    let (_, store) = load(config_path)?;
    if !store.delete(&paths::registry_entry(service_type))? {
        bail!("service type {service_type:?} is not registered");
    }
    info!(%service_type, "descriptor removed");
    Ok(())
}

pub async fn discover(config_path: &Path) -> anyhow::Result<()> {
    let (config, store) = load(config_path)?;
    let discovery = Discovery::new(
        store,
        config.agents.clone(),
        config.orchestrator.discovery_timeout(),
    );
    print_json(&discovery.discover().await)
}
