use axum::{Extension, Json, body::Bytes, extract::State, http::StatusCode};
use serde::Deserialize;
use tracing::error;

use super::require_user;
use crate::AppState;
use crate::security::UserContext;
use crate::simulation::{ConnectionStats, SaveError, SimulationRecord};

#[derive(Debug, Default, Deserialize)]
pub struct SaveRequest {
    #[serde(default)]
    pub formula_id: Option<String>,
}

/// POST /api/simulation/save - Persist the caller's current simulation.
///
/// The body is optional; an empty body saves without a formula reference.
pub async fn save(
    State(state): State<AppState>,
    context: Option<Extension<UserContext>>,
    body: Bytes,
) -> Result<Json<SimulationRecord>, (StatusCode, String)> {
    let user = require_user(context)?;
    let request: SaveRequest = if body.is_empty() {
        SaveRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    };

    match state.orchestrator.save(&user.user_id, request.formula_id).await {
        Ok(record) => Ok(Json(record)),
        Err(SaveError::NothingToSave) => Err((
            StatusCode::NOT_FOUND,
            "no simulation in progress".to_string(),
        )),
        Err(e) => {
            error!(user_id = %user.user_id, error = %e, "Failed to save simulation");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to save simulation".to_string(),
            ))
        }
    }
}

/// GET /api/simulation/stats
pub async fn stats(State(state): State<AppState>) -> Json<ConnectionStats> {
    Json(state.orchestrator.stats())
}
