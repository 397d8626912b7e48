//! Local stand-ins for benchmarked services.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use coldbench_core::epoch_secs;

use crate::probe::discord::{SIGNATURE_HEADER, TIMESTAMP_HEADER};

const MAX_SKEW_SECS: u64 = 300;

pub(crate) async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// 200 on `GET /` and `POST /`, 404 elsewhere.
pub(crate) fn ok_service() -> Router {
    Router::new().route("/", get(|| async { "ok" }).post(|| async { "ok" }))
}

/// Like [`ok_service`], counting requests.
pub(crate) fn counting_service() -> (Router, Arc<AtomicU32>) {
    let hits = Arc::new(AtomicU32::new(0));
    let app = Router::new()
        .route(
            "/",
            get(|State(hits): State<Arc<AtomicU32>>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                "ok"
            }),
        )
        .with_state(hits.clone());
    (app, hits)
}

/// A conforming Discord interactions endpoint for the given public key.
pub(crate) fn discord_service(public_key_hex: &str) -> Router {
    let bytes: [u8; 32] = hex::decode(public_key_hex).unwrap().try_into().unwrap();
    let key = Arc::new(VerifyingKey::from_bytes(&bytes).unwrap());
    Router::new()
        .route("/", axum::routing::post(interaction))
        .with_state(key)
}

async fn interaction(
    State(key): State<Arc<VerifyingKey>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let unauthorized = || (StatusCode::UNAUTHORIZED, "invalid request signature").into_response();

    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let (Some(sig), Some(ts)) = (header(SIGNATURE_HEADER), header(TIMESTAMP_HEADER)) else {
        return unauthorized();
    };
    let Some(sig) = hex::decode(sig)
        .ok()
        .and_then(|b| <[u8; 64]>::try_from(b).ok())
    else {
        return unauthorized();
    };
    let mut message = ts.as_bytes().to_vec();
    message.extend_from_slice(&body);
    if key.verify(&message, &Signature::from_bytes(&sig)).is_err() {
        return unauthorized();
    }
    let Ok(ts) = ts.parse::<u64>() else {
        return unauthorized();
    };
    if epoch_secs().abs_diff(ts) > MAX_SKEW_SECS {
        return unauthorized();
    }

    let Ok(value) = serde_json::from_slice::<serde_json::Value>(&body) else {
        return (StatusCode::BAD_REQUEST, "malformed body").into_response();
    };
    match value.get("type").and_then(|t| t.as_u64()) {
        Some(1) => axum::Json(serde_json::json!({ "type": 1 })).into_response(),
        Some(2) => axum::Json(serde_json::json!({ "type": 5 })).into_response(),
        _ => (StatusCode::BAD_REQUEST, "unknown interaction type").into_response(),
    }
}
