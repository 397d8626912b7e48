//! Full run against live Agents: discover, deploy, fire triggers, collect,
//! report, promote.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use serde_json::json;

use coldbench_agent::config::AgentDefaults;
use coldbench_agent::platform::StaticPlatform;
use coldbench_agent::probe::HttpProbe;
use coldbench_agent::{Agent, AgentParts};
use coldbench_api::{AgentApiState, build_router};
use coldbench_core::*;
use coldbench_manager::config::{OrchestratorConfig, ReportConfig};
use coldbench_manager::report::{self, Verdict};
use coldbench_manager::{AgentClient, Discovery, Orchestrator, RunRequest, baseline};
use coldbench_state::RunStore;
use coldbench_trigger::{DispatchConfig, StoreScheduler, TriggerDispatcher};

const TOKEN: &str = "s3cret";

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Start an Agent API for `service_type` whose units all resolve to `target`.
async fn spawn_agent(service_type: &str, store: &RunStore, target: &str) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());
    let agent = Agent::from_parts(AgentParts {
        service_type: service_type.into(),
        implementations: vec![ImplementationEntry {
            name: "alpha".into(),
            status: ImplementationStatus::Active,
        }],
        defaults: AgentDefaults {
            idle_poll_timeout_secs: 0,
            idle_poll_interval_ms: 1,
            retry_backoff_ms: 1,
            ..AgentDefaults::default()
        },
        measure_url: format!("{endpoint}/measure"),
        store: store.clone(),
        platform: Arc::new(StaticPlatform::new(target)),
        probe: Arc::new(HttpProbe::new(service_type, "GET", "/", None, 200, &[]).unwrap()),
        scheduler: Arc::new(StoreScheduler::new(store.clone())),
    })
    .unwrap();
    let app = build_router(AgentApiState::new(agent, Some(TOKEN.into())));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    store
        .put_descriptor(&AgentDescriptor {
            service_type: service_type.into(),
            enabled: true,
            endpoint: endpoint.clone(),
            implementations: Vec::new(),
        })
        .unwrap();
    endpoint
}

fn orchestrator(store: &RunStore, collect_timeout_secs: u64) -> Orchestrator {
    Orchestrator::new(
        store.clone(),
        Discovery::new(store.clone(), Vec::new(), Duration::from_secs(5)),
        AgentClient::new(Some(TOKEN.into()), Duration::from_secs(10)).unwrap(),
        OrchestratorConfig {
            poll_interval_secs: 1,
            collect_timeout_secs,
            ..OrchestratorConfig::default()
        },
        BenchmarkConfig {
            cold_start_iterations: 2,
            warm_requests: 4,
            warm_concurrency: 2,
            request_timeout_ms: 2_000,
            scale_to_zero_timeout_secs: 0,
        },
    )
}

fn immediate_measure() -> AgentConfigPayload {
    json!({ "schedule": { "measure_delay_minutes": 0 } })
        .as_object()
        .cloned()
        .unwrap()
}

#[tokio::test]
async fn run_collect_report_promote() {
    let store = RunStore::in_memory().unwrap();
    let target = serve(Router::new().route("/", get(|| async { "ok" }))).await;
    spawn_agent("echo", &store, &target).await;
    spawn_agent("ping", &store, &target).await;
    store
        .put_descriptor(&AgentDescriptor {
            service_type: "ghost".into(),
            enabled: true,
            endpoint: "http://127.0.0.1:1".into(),
            implementations: Vec::new(),
        })
        .unwrap();

    let orchestrator = orchestrator(&store, 30);
    let record = orchestrator
        .run_all(RunRequest {
            agent_configs: BTreeMap::from([
                ("echo".to_string(), immediate_measure()),
                ("ping".to_string(), immediate_measure()),
            ]),
            ..RunRequest::default()
        })
        .await
        .unwrap();
    let run_id = record.run_id.clone();
    let accepted: Vec<(&str, bool)> = record
        .agents
        .iter()
        .map(|a| (a.service_type.as_str(), a.accepted))
        .collect();
    assert_eq!(accepted, [("echo", true), ("ghost", false), ("ping", true)]);
    assert_eq!(store.get_index().unwrap().latest().unwrap().run_id, run_id);

    let dispatcher = TriggerDispatcher::new(
        StoreScheduler::new(store.clone()),
        DispatchConfig {
            auth_token: Some(TOKEN.into()),
            ..DispatchConfig::default()
        },
    )
    .unwrap();
    assert_eq!(dispatcher.tick(epoch_secs()).await.unwrap(), 2);

    let run = orchestrator.collect(&run_id).await.unwrap();
    assert_eq!(run.agents["echo"].state, AgentState::Completed);
    assert_eq!(run.agents["ping"].state, AgentState::Completed);
    assert_eq!(run.agents["ghost"].state, AgentState::Rejected);
    assert_eq!(run.summary.units_total, 2);
    assert_eq!(run.summary.units_succeeded, 2);
    assert_eq!(store.get_run(&run_id).unwrap().unwrap(), run);

    let first = report::publish(&store, &run_id, &ReportConfig::default()).unwrap();
    assert!(first.baseline_run_id.is_none());
    assert!(first.fastest_cold_start.is_some());
    assert!(store.get_report(&run_id, "md").unwrap().is_some());

    baseline::promote(&store, &run_id).unwrap();
    let second = report::publish(&store, &run_id, &ReportConfig::default()).unwrap();
    assert_eq!(second.baseline_run_id.as_deref(), Some(run_id.as_str()));
    assert!(!second.comparisons.is_empty());
    assert!(second.comparisons.iter().all(|c| c.verdict == Verdict::Unchanged));

    let cleaned = orchestrator.cleanup(&run_id).await.unwrap();
    assert_eq!(cleaned.len(), 2);
    assert!(cleaned.iter().all(|c| c.error.is_none()));
}

#[tokio::test]
async fn agents_still_waiting_are_timed_out() {
    let store = RunStore::in_memory().unwrap();
    let target = serve(Router::new().route("/", get(|| async { "ok" }))).await;
    spawn_agent("echo", &store, &target).await;

    let orchestrator = orchestrator(&store, 1);
    let record = orchestrator.run_all(RunRequest::default()).await.unwrap();
    assert!(record.agents[0].accepted);

    let run = orchestrator.collect(&record.run_id).await.unwrap();
    let echo = &run.agents["echo"];
    assert_eq!(echo.state, AgentState::TimedOut);
    assert_eq!(echo.phase, Some(Phase::Waiting));
    assert_eq!(run.summary.agents_timed_out, 1);
    assert_eq!(run.errors, ["echo: timed_out".to_string()]);
}

#[tokio::test]
async fn collect_unknown_run_is_not_found() {
    let store = RunStore::in_memory().unwrap();
    let orchestrator = orchestrator(&store, 1);
    assert!(matches!(
        orchestrator.collect("nope").await,
        Err(coldbench_manager::ManagerError::NotFound(_))
    ));
}
