//! Agent API over a real in-memory Agent.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use serde_json::{Value, json};
use tower::ServiceExt;

use coldbench_agent::config::AgentDefaults;
use coldbench_agent::platform::StaticPlatform;
use coldbench_agent::probe::HttpProbe;
use coldbench_agent::{Agent, AgentParts};
use coldbench_api::{AgentApiState, build_router};
use coldbench_core::{ImplementationEntry, ImplementationStatus};
use coldbench_state::RunStore;
use coldbench_trigger::StoreScheduler;

const TOKEN: &str = "s3cret";

async fn serve_target() -> String {
    let app = Router::new().route("/", get(|| async { "ok" }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn test_router() -> Router {
    let endpoint = serve_target().await;
    let store = RunStore::in_memory().unwrap();
    let agent = Agent::from_parts(AgentParts {
        service_type: "echo".into(),
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
        measure_url: "http://127.0.0.1:9/measure".into(),
        store: store.clone(),
        platform: Arc::new(StaticPlatform::new(&endpoint)),
        probe: Arc::new(HttpProbe::new("echo", "GET", "/", None, 200, &[]).unwrap()),
        scheduler: Arc::new(StoreScheduler::new(store)),
    })
    .unwrap();
    build_router(AgentApiState::new(agent, Some(TOKEN.into())))
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {TOKEN}"))
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get_req(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {TOKEN}"))
        .body(Body::empty())
        .unwrap()
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn deploy_body(run_id: &str) -> Value {
    json!({
        "run_id": run_id,
        "benchmark_config": {
            "cold_start_iterations": 1,
            "warm_requests": 2,
            "warm_concurrency": 1,
            "request_timeout_ms": 2000,
            "scale_to_zero_timeout_secs": 0
        },
        "agent_config": {}
    })
}

#[tokio::test]
async fn health_needs_no_token() {
    let router = test_router().await;
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service_type"], "echo");
}

#[tokio::test]
async fn missing_or_wrong_token_is_rejected() {
    let router = test_router().await;
    let req = Request::builder().uri("/implementations").body(Body::empty()).unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(resp).await["kind"], "unauthorized");

    let req = Request::builder()
        .uri("/implementations")
        .header("authorization", "Bearer nope")
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = router.oneshot(get_req("/implementations")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["implementations"][0]["name"], "alpha");
}

#[tokio::test]
async fn deploy_then_duplicate() {
    let router = test_router().await;
    let resp = router.clone().oneshot(post("/deploy", deploy_body("a1"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["status"], "waiting");
    assert_eq!(body["services_to_deploy"], 1);
    assert_eq!(body["scheduler_job_id"], "measure-echo-a1");

    let resp = router.clone().oneshot(post("/deploy", deploy_body("a1"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(resp).await["kind"], "duplicate");

    let resp = router.oneshot(get_req("/status/a1")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["phase"], "waiting");
}

#[tokio::test]
async fn malformed_body_is_a_config_error() {
    let router = test_router().await;
    let resp = router.oneshot(post("/deploy", json!({ "nope": 1 }))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(resp).await["kind"], "config");
}

#[tokio::test]
async fn unknown_run_is_not_found() {
    let router = test_router().await;
    let resp = router.clone().oneshot(post("/measure", json!({ "run_id": "zz" }))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = router.clone().oneshot(get_req("/status/zz")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = router.oneshot(get_req("/results/zz")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn measure_runs_in_background() {
    let router = test_router().await;
    router.clone().oneshot(post("/deploy", deploy_body("m1"))).await.unwrap();

    let resp = router.clone().oneshot(post("/measure", json!({ "run_id": "m1" }))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let body = json_body(resp).await;
    assert_eq!(body["status"], "measuring");
    assert_eq!(body["results_url"], "/results/m1");

    let mut phase = Value::Null;
    for _ in 0..100 {
        let resp = router.clone().oneshot(get_req("/status/m1")).await.unwrap();
        phase = json_body(resp).await["phase"].clone();
        if phase == "completed" || phase == "failed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(phase, "completed");

    let resp = router.clone().oneshot(get_req("/results/m1")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let results = json_body(resp).await;
    assert_eq!(results["results"][0]["status"], "success");

    // A late duplicate trigger is answered from the stored state.
    let resp = router.oneshot(post("/measure", json!({ "run_id": "m1" }))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["status"], "completed");
}

#[tokio::test]
async fn measure_after_cleanup_is_gone() {
    let router = test_router().await;
    router.clone().oneshot(post("/deploy", deploy_body("c1"))).await.unwrap();

    let resp = router.clone().oneshot(post("/cleanup", json!({ "run_id": "c1" }))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["scheduler_job_deleted"], true);

    let resp = router.oneshot(post("/measure", json!({ "run_id": "c1" }))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::GONE);
    assert_eq!(json_body(resp).await["kind"], "cancelled");
}

#[tokio::test]
async fn legacy_benchmark_completes_in_one_call() {
    let router = test_router().await;
    let resp = router.oneshot(post("/benchmark", deploy_body("b1"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["results_url"], "/results/b1");
}
