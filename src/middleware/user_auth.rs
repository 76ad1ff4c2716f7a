use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

use crate::db::{AppState, queries};
use crate::gate::Actor;
use crate::util::extract_bearer_token;

/// Resolve the optional user API key into an [`Actor`] extension.
/// No Authorization header means anonymous; a key nobody owns is 401.
pub async fn actor_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let actor = match extract_bearer_token(request.headers()) {
        None if request.headers().contains_key("Authorization") => {
            return Err(StatusCode::UNAUTHORIZED);
        }
        None => Actor::Anonymous,
        Some(api_key) => {
            let conn = state
                .db
                .get()
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            let user = queries::get_user_by_api_key(&conn, api_key)
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
                .ok_or(StatusCode::UNAUTHORIZED)?;
            Actor::User { user_id: user.id }
        }
    };

    request.extensions_mut().insert(actor);
    Ok(next.run(request).await)
}
