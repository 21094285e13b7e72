use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use vanish_types::api::Claims;

use crate::auth::AppState;
use crate::error::{ApiError, AuthError};

/// Reject requests without a valid bearer token; stash the claims otherwise.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims =
        bearer_claims(req.headers(), &state.jwt_secret).ok_or(AuthError::Unauthorized)?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Claims from the `Authorization: Bearer` header, if present and valid.
/// Routes where signing in is optional treat a bad token as anonymous.
pub fn bearer_claims(headers: &HeaderMap, jwt_secret: &str) -> Option<Claims> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))?;

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}
