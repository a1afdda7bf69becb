use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::error::ApiError;
use crate::state::AppState;

/// Extract and validate the bearer session token.
///
/// A missing or non-Bearer `Authorization` header is 401; a token that is
/// present but invalid, expired or of the wrong kind is 403. On success the
/// `SessionClaims` are stored in the request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ApiError::Unauthorized("Authentication required".into()))?;

    let token = auth_header
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("Expected a Bearer token".into()))?;

    let claims = state.tokens.verify_session(token)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
