use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::db::AppState;
use crate::util::extract_bearer_token;

/// Require the configured admin token. With no token configured every admin
/// request is rejected.
pub async fn admin_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let expected = state.admin_token.as_deref().ok_or(StatusCode::UNAUTHORIZED)?;
    let provided = extract_bearer_token(request.headers()).ok_or(StatusCode::UNAUTHORIZED)?;

    if !bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        tracing::warn!("Rejected admin request with invalid token");
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}
