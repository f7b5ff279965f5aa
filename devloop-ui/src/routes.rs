//! HTTP route handlers for the UI API.

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use devloop::core::types::ProgressState;
use devloop::status::{PlanView, StatusReport};
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};

use crate::sse;
use crate::state::AppState;

/// Full application: API under `/api`, change stream under `/events`.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", api_router())
        .route("/events", get(sse::events_handler))
        .layer(cors)
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(get_status))
        .route("/plan", get(get_plan))
        .route("/progress", get(get_progress))
        .route("/cycle", post(trigger_cycle))
}

async fn health() -> &'static str {
    "ok"
}

/// GET /api/status - overall progress, current work, recent activity, gate.
async fn get_status(State(state): State<AppState>) -> Json<StatusReport> {
    Json(state.engine.status())
}

/// GET /api/plan - plan with completion markers.
async fn get_plan(State(state): State<AppState>) -> Json<PlanView> {
    Json(state.engine.plan_view())
}

/// GET /api/progress - the raw progress document.
async fn get_progress(State(state): State<AppState>) -> Json<ProgressState> {
    Json(state.engine.snapshot())
}

/// POST /api/cycle - 202 when a cycle was started, 409 when one is running.
async fn trigger_cycle(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    if state.trigger_cycle() {
        (StatusCode::ACCEPTED, Json(json!({ "started": true })))
    } else {
        (
            StatusCode::CONFLICT,
            Json(json!({ "started": false, "error": "a cycle is already running" })),
        )
    }
}
