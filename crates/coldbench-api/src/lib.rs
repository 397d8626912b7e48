//! coldbench-api — the Agent's HTTP surface.
//!
//! Thin axum layer over [`coldbench_agent::Agent`]. Every route except
//! `/health` requires `Authorization: Bearer <token>` when a token is
//! configured.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/deploy` | Deploy every unit and schedule Measure |
//! | POST | `/measure` | Measure a deployed run (called by the trigger) |
//! | POST | `/cleanup` | Cancel a run and delete its units |
//! | POST | `/benchmark` | Legacy deploy + measure in one call |
//! | GET | `/status/{run_id}` | Status record of a run |
//! | GET | `/results/{run_id}` | Results document of a run |
//! | GET | `/implementations` | Implementations this Agent can deploy |
//! | GET | `/health` | Liveness, no auth |

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};

use coldbench_agent::Agent;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct AgentApiState {
    pub agent: Agent,
    /// Expected bearer token. `None` disables authentication.
    pub token: Option<Arc<str>>,
}

impl AgentApiState {
    pub fn new(agent: Agent, token: Option<String>) -> Self {
        Self {
            agent,
            token: token.map(Arc::from),
        }
    }
}

/// Build the Agent router.
pub fn build_router(state: AgentApiState) -> Router {
    let protected = Router::new()
        .route("/deploy", post(handlers::deploy))
        .route("/measure", post(handlers::measure))
        .route("/cleanup", post(handlers::cleanup))
        .route("/benchmark", post(handlers::benchmark))
        .route("/status/{run_id}", get(handlers::status))
        .route("/results/{run_id}", get(handlers::results))
        .route("/implementations", get(handlers::implementations))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .with_state(state)
}
