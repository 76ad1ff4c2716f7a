//! Append-only audit trail of purchase-code verification attempts, plus the
//! read side the admin log screens use.

use chrono::DateTime;
use rusqlite::Connection;
use serde::Serialize;

use crate::db::{DbPool, queries};
use crate::error::{AppError, Result};
use crate::models::{
    NewVerificationLog, SuspiciousIp, VerificationLog, VerificationLogQuery, VerificationLogView,
    VerificationStats,
};

pub const MAX_STATS_DAYS: i64 = 365;
pub const MAX_SUSPICIOUS_HOURS: i64 = 24 * 30;
pub const MAX_RETENTION_DAYS: i64 = 3650;

/// Column order of the CSV export. Matches `CsvRow`'s field order.
const CSV_HEADERS: [&str; 11] = [
    "id",
    "created_at",
    "domain",
    "masked_purchase_code",
    "purchase_code_hash",
    "ip_address",
    "status",
    "verification_source",
    "is_valid",
    "response_message",
    "error_details",
];

/// Write one log row. The insert runs on a blocking task that is awaited
/// here; if the caller's future is dropped mid-write, the task still runs to
/// completion.
pub async fn append(pool: &DbPool, entry: NewVerificationLog) -> Result<VerificationLog> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        queries::create_verification_log(&conn, &entry)
    })
    .await
    .map_err(|e| AppError::Internal(format!("Verification log writer failed: {}", e)))?
}

pub fn get(conn: &Connection, id: i64) -> Result<VerificationLog> {
    queries::get_verification_log(conn, id)?
        .ok_or_else(|| AppError::NotFound("Verification log not found".into()))
}

fn check_time_range(query: &VerificationLogQuery) -> Result<()> {
    if let (Some(from), Some(to)) = (query.from_timestamp, query.to_timestamp) {
        if from > to {
            return Err(AppError::BadRequest(
                "from_timestamp must not be after to_timestamp".into(),
            ));
        }
    }
    Ok(())
}

pub fn list_by_filter(
    conn: &Connection,
    query: &VerificationLogQuery,
) -> Result<(Vec<VerificationLogView>, i64)> {
    check_time_range(query)?;
    let (logs, total) = queries::query_verification_logs(conn, query)?;
    Ok((logs.into_iter().map(VerificationLogView::from).collect(), total))
}

#[derive(Serialize)]
struct CsvRow<'a> {
    id: i64,
    created_at: String,
    domain: &'a str,
    masked_purchase_code: &'a str,
    purchase_code_hash: &'a str,
    ip_address: &'a str,
    status: &'a str,
    verification_source: &'a str,
    is_valid: &'static str,
    response_message: &'a str,
    error_details: &'a str,
}

impl<'a> From<&'a VerificationLog> for CsvRow<'a> {
    fn from(log: &'a VerificationLog) -> Self {
        Self {
            id: log.id,
            created_at: DateTime::from_timestamp(log.created_at, 0)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            domain: &log.domain,
            masked_purchase_code: &log.masked_purchase_code,
            purchase_code_hash: &log.purchase_code_hash,
            ip_address: log.ip_address.as_deref().unwrap_or(""),
            status: log.status.as_ref(),
            verification_source: log.verification_source.as_ref(),
            is_valid: if log.is_valid { "Yes" } else { "No" },
            response_message: &log.response_message,
            error_details: log.error_details.as_deref().unwrap_or(""),
        }
    }
}

/// Every row matching the listing filters, newest first, as CSV with a
/// header row. Pagination fields are ignored. Timestamps are UTC.
pub fn export_csv(conn: &Connection, query: &VerificationLogQuery) -> Result<Vec<u8>> {
    check_time_range(query)?;
    let logs = queries::export_verification_logs(conn, query)?;

    let mut writer = csv::Writer::from_writer(Vec::new());
    for log in &logs {
        writer
            .serialize(CsvRow::from(log))
            .map_err(|e| AppError::Internal(format!("CSV write failed: {}", e)))?;
    }
    if logs.is_empty() {
        writer
            .write_record(CSV_HEADERS)
            .map_err(|e| AppError::Internal(format!("CSV write failed: {}", e)))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("CSV flush failed: {}", e.error())))?;

    tracing::info!(rows = logs.len(), "Exported verification logs");
    Ok(bytes)
}

pub fn stats(conn: &Connection, days: i64) -> Result<VerificationStats> {
    if !(1..=MAX_STATS_DAYS).contains(&days) {
        return Err(AppError::BadRequest(format!(
            "days must be between 1 and {}",
            MAX_STATS_DAYS
        )));
    }
    queries::verification_log_stats(conn, days)
}

pub fn suspicious_activity(
    conn: &Connection,
    hours: i64,
    min_attempts: i64,
) -> Result<Vec<SuspiciousIp>> {
    if !(1..=MAX_SUSPICIOUS_HOURS).contains(&hours) {
        return Err(AppError::BadRequest(format!(
            "hours must be between 1 and {}",
            MAX_SUSPICIOUS_HOURS
        )));
    }
    if min_attempts < 1 {
        return Err(AppError::BadRequest("min_attempts must be at least 1".into()));
    }
    queries::suspicious_ips(conn, hours, min_attempts)
}

/// Delete rows older than `days` days. Returns how many were removed.
pub fn purge_older_than(conn: &Connection, days: i64) -> Result<usize> {
    if !(1..=MAX_RETENTION_DAYS).contains(&days) {
        return Err(AppError::BadRequest(format!(
            "older_than_days must be between 1 and {}",
            MAX_RETENTION_DAYS
        )));
    }
    let deleted = queries::purge_verification_logs(conn, days)?;
    if deleted > 0 {
        tracing::info!(deleted, days, "Purged old verification logs");
    }
    Ok(deleted)
}
