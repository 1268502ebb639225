use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::debug;

use super::claims::{UserClaims, UserContext};
use crate::AppState;

/// Validate a `Bearer` JWT and attach the caller's [`UserContext`].
///
/// With `jwt_required` off, requests without a token pass through
/// anonymously; handlers that need a user reject them.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    let Some(token) = token else {
        if !state.config.security.jwt_required {
            return Ok(next.run(request).await);
        }
        return Err(StatusCode::UNAUTHORIZED);
    };

    let key = DecodingKey::from_secret(state.config.security.jwt_secret.as_bytes());
    match decode::<UserClaims>(token, &key, &Validation::default()) {
        Ok(token_data) => {
            let claims = token_data.claims;
            let context = UserContext {
                user_id: claims.sub.clone(),
                claims,
            };
            request.extensions_mut().insert(context);
            Ok(next.run(request).await)
        }
        Err(e) => {
            debug!(name: "auth.rejected", error = %e, "Bearer token rejected");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
