mod licenses;
mod verification_logs;

pub use licenses::*;
pub use verification_logs::*;

use axum::{
    Router, middleware,
    routing::{get, put},
};

use crate::db::AppState;
use crate::middleware::admin_auth;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/admin/verification-logs",
            get(list_verification_logs).delete(purge_verification_logs),
        )
        .route(
            "/admin/verification-logs/stats",
            get(verification_log_stats),
        )
        .route(
            "/admin/verification-logs/suspicious",
            get(suspicious_activity),
        )
        .route(
            "/admin/verification-logs/export",
            get(export_verification_logs),
        )
        .route("/admin/verification-logs/{id}", get(get_verification_log))
        .route("/admin/licenses/{id}/domains", get(list_license_domains))
        .route("/admin/licenses/{id}/status", put(update_license_status))
        .layer(middleware::from_fn_with_state(state, admin_auth))
}
