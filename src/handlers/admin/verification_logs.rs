use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use crate::db::AppState;
use crate::error::Result;
use crate::extractors::{Json, Path, Query};
use crate::models::{SuspiciousIp, VerificationLogQuery, VerificationLogView, VerificationStats};
use crate::verification_log;

#[derive(Debug, Serialize)]
pub struct VerificationLogPage {
    pub logs: Vec<VerificationLogView>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

/// GET /admin/verification-logs - Filtered, paginated log listing, newest first
pub async fn list_verification_logs(
    State(state): State<AppState>,
    Query(query): Query<VerificationLogQuery>,
) -> Result<Json<VerificationLogPage>> {
    let conn = state.db.get()?;
    let (logs, total) = verification_log::list_by_filter(&conn, &query)?;

    Ok(Json(VerificationLogPage {
        logs,
        total,
        page: query.page(),
        per_page: query.limit(),
    }))
}

/// GET /admin/verification-logs/export - Listing filters applied, every row as CSV
pub async fn export_verification_logs(
    State(state): State<AppState>,
    Query(query): Query<VerificationLogQuery>,
) -> Result<impl IntoResponse> {
    let conn = state.db.get()?;
    let body = verification_log::export_csv(&conn, &query)?;
    let filename = format!(
        "verification-logs-{}.csv",
        chrono::Utc::now().format("%Y-%m-%d_%H-%M-%S")
    );

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    ))
}

/// GET /admin/verification-logs/{id}
pub async fn get_verification_log(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<VerificationLogView>> {
    let conn = state.db.get()?;
    let log = verification_log::get(&conn, id)?;
    Ok(Json(log.into()))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    #[serde(default = "default_stats_days")]
    pub days: i64,
}

fn default_stats_days() -> i64 {
    30
}

/// GET /admin/verification-logs/stats
pub async fn verification_log_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<VerificationStats>> {
    let conn = state.db.get()?;
    Ok(Json(verification_log::stats(&conn, query.days)?))
}

#[derive(Debug, Deserialize)]
pub struct SuspiciousQuery {
    #[serde(default = "default_hours")]
    pub hours: i64,
    #[serde(default = "default_min_attempts")]
    pub min_attempts: i64,
}

fn default_hours() -> i64 {
    24
}

fn default_min_attempts() -> i64 {
    5
}

#[derive(Debug, Serialize)]
pub struct SuspiciousActivityResponse {
    pub hours: i64,
    pub min_attempts: i64,
    pub ips: Vec<SuspiciousIp>,
}

/// GET /admin/verification-logs/suspicious - IPs with repeated failed attempts
pub async fn suspicious_activity(
    State(state): State<AppState>,
    Query(query): Query<SuspiciousQuery>,
) -> Result<Json<SuspiciousActivityResponse>> {
    let conn = state.db.get()?;
    let ips = verification_log::suspicious_activity(&conn, query.hours, query.min_attempts)?;

    Ok(Json(SuspiciousActivityResponse {
        hours: query.hours,
        min_attempts: query.min_attempts,
        ips,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PurgeQuery {
    pub older_than_days: i64,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub deleted: usize,
}

/// DELETE /admin/verification-logs - Apply the retention window now
pub async fn purge_verification_logs(
    State(state): State<AppState>,
    Query(query): Query<PurgeQuery>,
) -> Result<Json<PurgeResponse>> {
    let conn = state.db.get()?;
    let deleted = verification_log::purge_older_than(&conn, query.older_than_days)?;
    Ok(Json(PurgeResponse { deleted }))
}
