use axum::{Extension, Json, extract::State, http::StatusCode};
use tracing::error;

use super::require_user;
use crate::AppState;
use crate::security::{IssuedTicket, UserContext};

/// POST /api/auth/ws-ticket - Issue a one-time ticket for the simulation channel.
pub async fn issue_ticket(
    State(state): State<AppState>,
    context: Option<Extension<UserContext>>,
) -> Result<Json<IssuedTicket>, (StatusCode, String)> {
    let user = require_user(context)?;
    let issued = state.tickets.issue(&user.user_id).await.map_err(|e| {
        error!(user_id = %user.user_id, error = %e, "Failed to issue ticket");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to issue ticket".to_string(),
        )
    })?;
    Ok(Json(issued))
}
