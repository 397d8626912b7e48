//! Agent API handlers.
//!
//! Each handler delegates to the [`Agent`](coldbench_agent::Agent) and maps
//! its error class onto an HTTP status with an [`ErrorBody`].

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, info};

use coldbench_agent::{AgentError, MeasurePlan};
use coldbench_core::*;

use crate::AgentApiState;

/// [`AgentError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub AgentError);

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self(AgentError::Config(e.body_text()))
    }
}

pub fn status_code(e: &AgentError) -> StatusCode {
    match e {
        AgentError::Config(_) => StatusCode::BAD_REQUEST,
        AgentError::Duplicate(_) => StatusCode::CONFLICT,
        AgentError::NotFound(_) => StatusCode::NOT_FOUND,
        AgentError::Cancelled(_) => StatusCode::GONE,
        AgentError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        AgentError::Unauthorized => StatusCode::UNAUTHORIZED,
        AgentError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_code(&self.0);
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        let body = ErrorBody {
            kind: self.0.kind().to_string(),
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Run lifecycle ──────────────────────────────────────────────

/// POST /deploy
pub async fn deploy(
    State(state): State<AgentApiState>,
    payload: Result<Json<BenchmarkRequest>, JsonRejection>,
) -> ApiResult<Json<DeployResponse>> {
    let Json(request) = payload?;
    Ok(Json(state.agent.deploy(request).await?))
}

/// POST /measure
///
/// Answers once the run is claimed; measurement continues in the
/// background and its outcome lands in the status record.
pub async fn measure(
    State(state): State<AgentApiState>,
    payload: Result<Json<RunRef>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(RunRef { run_id }) = payload?;
    match state.agent.prepare_measure(&run_id).await? {
        MeasurePlan::Done(response) => Ok(Json(response).into_response()),
        MeasurePlan::Run(job) => {
            let agent = state.agent.clone();
            tokio::spawn(async move {
                let run_id = job.run_id().to_string();
                if let Err(e) = agent.execute_measure(job).await {
                    error!(%run_id, error = %e, "measurement failed");
                }
            });
            info!(%run_id, "measurement accepted");
            let body = MeasureResponse {
                results_url: Some(results_path(&run_id)),
                run_id,
                status: Phase::Measuring,
            };
            Ok((StatusCode::ACCEPTED, Json(body)).into_response())
        }
    }
}

/// POST /cleanup
pub async fn cleanup(
    State(state): State<AgentApiState>,
    payload: Result<Json<RunRef>, JsonRejection>,
) -> ApiResult<Json<CleanupResponse>> {
    let Json(RunRef { run_id }) = payload?;
    Ok(Json(state.agent.cleanup(&run_id).await?))
}

/// POST /benchmark
pub async fn benchmark(
    State(state): State<AgentApiState>,
    payload: Result<Json<BenchmarkRequest>, JsonRejection>,
) -> ApiResult<Json<MeasureResponse>> {
    let Json(request) = payload?;
    Ok(Json(state.agent.benchmark(request).await?))
}

// ── Documents ──────────────────────────────────────────────────

/// GET /status/{run_id}
pub async fn status(
    State(state): State<AgentApiState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<StatusRecord>> {
    Ok(Json(state.agent.status(&run_id)?))
}

/// GET /results/{run_id}
pub async fn results(
    State(state): State<AgentApiState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<ResultsDocument>> {
    Ok(Json(state.agent.results(&run_id)?))
}

// ── Introspection ──────────────────────────────────────────────

/// GET /implementations
pub async fn implementations(State(state): State<AgentApiState>) -> Json<ImplementationsResponse> {
    Json(state.agent.implementations())
}

/// GET /health
pub async fn health(State(state): State<AgentApiState>) -> Json<HealthResponse> {
    Json(state.agent.health())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classes_map_to_statuses() {
        let cases = [
            (AgentError::Config("x".into()), 400, "config"),
            (AgentError::Duplicate("r".into()), 409, "duplicate"),
            (AgentError::NotFound("r".into()), 404, "not_found"),
            (AgentError::Cancelled("r".into()), 410, "cancelled"),
            (AgentError::Transient("x".into()), 503, "transient"),
            (AgentError::Unauthorized, 401, "unauthorized"),
        ];
        for (err, code, kind) in cases {
            assert_eq!(status_code(&err).as_u16(), code);
            assert_eq!(err.kind(), kind);
        }
    }
}
