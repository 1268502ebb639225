//! HTTP and WebSocket handlers.

pub mod auth;
pub mod safety;
pub mod simulation;
pub mod ws;

use axum::{Extension, Json, extract::State, http::StatusCode};
use serde_json::{Value, json};

use crate::AppState;
use crate::security::UserContext;

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /metrics - Prometheus text format.
pub async fn metrics(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .metrics
        .as_ref()
        .map(metrics_exporter_prometheus::PrometheusHandle::render)
        .ok_or(StatusCode::NOT_FOUND)
}

/// The authenticated caller, or 401 when the request carried no token.
pub(crate) fn require_user(
    context: Option<Extension<UserContext>>,
) -> Result<UserContext, (StatusCode, String)> {
    context
        .map(|Extension(ctx)| ctx)
        .ok_or((StatusCode::UNAUTHORIZED, "authentication required".to_string()))
}
