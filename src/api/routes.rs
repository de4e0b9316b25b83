//! Operator surface: liveness, readiness, metrics and stats reset

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::Result;
use crate::middleware::auth::AuthLayer;
use crate::AppState;

/// Build the operator router
pub fn create_router(state: Arc<AppState>, api_keys: Vec<String>) -> Router {
    let admin = Router::new()
        .route("/admin/stats/reset", post(reset_stats))
        .route_layer(AuthLayer::new(api_keys));

    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .merge(admin)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "alive",
        "uptime_secs": state.health.uptime_secs(),
    }))
}

async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.health.report();
    let status = if report.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": report.status,
            "queued": report.limiter.queued,
            "active": report.limiter.active,
        })),
    )
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let report = state.health.report();
    Ok(Json(serde_json::to_value(&report)?))
}

async fn reset_stats(State(state): State<Arc<AppState>>) -> StatusCode {
    state.dispatcher.stats().reset();
    info!("Dispatch stats reset by operator");
    StatusCode::NO_CONTENT
}
