pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod gate;
pub mod handlers;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod registry;
pub mod util;
pub mod verification;
pub mod verification_log;

use axum::Router;

use crate::db::AppState;

/// Full application router without the transport layers (trace, CORS, rate
/// limiting) that `main` adds.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(handlers::public::router())
        .merge(handlers::kb::router(state.clone()))
        .merge(handlers::kb::access_router(state.clone()))
        .merge(handlers::admin::router(state.clone()))
        .with_state(state)
}
