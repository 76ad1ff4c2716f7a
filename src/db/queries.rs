use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::*;
use crate::util::SECONDS_PER_DAY;

use super::from_row::{
    DOMAIN_COLS, KB_ARTICLE_COLS, KB_CATEGORY_COLS, LICENSE_COLS, PRODUCT_COLS, USER_COLS,
    VERIFICATION_LOG_COLS, query_all, query_one,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

/// Hash a user API key for storage/lookup (raw keys are never stored).
pub fn hash_secret(secret: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(b"licensegate-api-key-v1:");
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a user API key: `lg_` followed by 32 random hex characters.
pub fn generate_api_key() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("lg_{}", hex::encode(bytes))
}

// ============ Users ============

/// Create a user and return it together with its raw API key (shown once).
pub fn create_user(conn: &Connection, input: &CreateUser) -> Result<(User, String)> {
    let id = gen_id();
    let now = now();
    let api_key = generate_api_key();

    conn.execute(
        "INSERT INTO users (id, email, name, api_key_hash, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, &input.email, &input.name, hash_secret(&api_key), now],
    )?;

    Ok((
        User {
            id,
            email: input.email.clone(),
            name: input.name.clone(),
            created_at: now,
        },
        api_key,
    ))
}

pub fn get_user_by_api_key(conn: &Connection, api_key: &str) -> Result<Option<User>> {
    let hash = hash_secret(api_key);
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE api_key_hash = ?1", USER_COLS),
        &[&hash],
    )
}

// ============ Products ============

pub fn create_product(conn: &Connection, input: &CreateProduct) -> Result<Product> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO products (id, name, slug, marketplace_item_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, &input.name, &input.slug, &input.marketplace_item_id, now],
    )?;

    Ok(Product {
        id,
        name: input.name.clone(),
        slug: input.slug.clone(),
        marketplace_item_id: input.marketplace_item_id.clone(),
        created_at: now,
    })
}

pub fn get_product_by_id(conn: &Connection, id: &str) -> Result<Option<Product>> {
    query_one(
        conn,
        &format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLS),
        &[&id],
    )
}

// ============ Licenses ============

pub fn create_license(conn: &Connection, input: &CreateLicense) -> Result<License> {
    let id = gen_id();
    let now = now();
    let max_domains = input.license_type.max_domains();

    conn.execute(
        "INSERT INTO licenses (id, key, product_id, owner_id, status, license_type, max_domains, support_expires_at, license_expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?6, ?7, ?8, ?9)",
        params![
            &id,
            &input.key,
            &input.product_id,
            &input.owner_id,
            input.license_type.as_ref(),
            max_domains,
            input.support_expires_at,
            input.license_expires_at,
            now
        ],
    )?;

    Ok(License {
        id,
        key: input.key.clone(),
        product_id: input.product_id.clone(),
        owner_id: input.owner_id.clone(),
        status: LicenseStatus::Active,
        license_type: input.license_type,
        max_domains,
        support_expires_at: input.support_expires_at,
        license_expires_at: input.license_expires_at,
        created_at: now,
    })
}

/// Insert a license unless one with the same key already exists, then return
/// whichever row holds the key. A license imported earlier with no owner is
/// claimed by `input.owner_id`.
pub fn create_license_if_absent(conn: &mut Connection, input: &CreateLicense) -> Result<License> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

    tx.execute(
        "INSERT OR IGNORE INTO licenses (id, key, product_id, owner_id, status, license_type, max_domains, support_expires_at, license_expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?6, ?7, ?8, ?9)",
        params![
            gen_id(),
            &input.key,
            &input.product_id,
            &input.owner_id,
            input.license_type.as_ref(),
            input.license_type.max_domains(),
            input.support_expires_at,
            input.license_expires_at,
            now()
        ],
    )?;

    if input.owner_id.is_some() {
        tx.execute(
            "UPDATE licenses SET owner_id = ?1 WHERE key = ?2 AND owner_id IS NULL",
            params![&input.owner_id, &input.key],
        )?;
    }

    let license: Option<License> = query_one(
        &tx,
        &format!("SELECT {} FROM licenses WHERE key = ?1", LICENSE_COLS),
        &[&input.key],
    )?;
    tx.commit()?;

    license.ok_or_else(|| AppError::Internal("License vanished after insert".into()))
}

pub fn get_license_by_id(conn: &Connection, id: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE id = ?1", LICENSE_COLS),
        &[&id],
    )
}

/// Exact match; keys are never case-folded or otherwise normalized.
pub fn get_license_by_key(conn: &Connection, key: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE key = ?1", LICENSE_COLS),
        &[&key],
    )
}

pub fn list_licenses_for_user(conn: &Connection, user_id: &str) -> Result<Vec<License>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM licenses WHERE owner_id = ?1 ORDER BY created_at ASC",
            LICENSE_COLS
        ),
        &[&user_id],
    )
}

/// Whether the user owns an active, unexpired license for the product.
pub fn user_has_active_license(
    conn: &Connection,
    user_id: &str,
    product_id: &str,
    at: i64,
) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM licenses
         WHERE owner_id = ?1 AND product_id = ?2 AND status = 'active'
           AND (license_expires_at IS NULL OR license_expires_at > ?3)",
        params![user_id, product_id, at],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Returns false when no license has this id.
pub fn update_license_status(conn: &Connection, id: &str, status: LicenseStatus) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE licenses SET status = ?1 WHERE id = ?2",
        params![status.as_ref(), id],
    )?;
    Ok(updated > 0)
}

// ============ Domains ============

/// Result of registering a domain against a license.
#[derive(Debug)]
pub enum DomainRegistration {
    /// Already registered; returned unchanged (includes blocked rows)
    Existing(Domain),
    /// Was pending and is now active
    Activated(Domain),
    /// Newly registered
    Created(Domain),
}

impl DomainRegistration {
    pub fn into_domain(self) -> Domain {
        match self {
            DomainRegistration::Existing(d)
            | DomainRegistration::Activated(d)
            | DomainRegistration::Created(d) => d,
        }
    }
}

/// Register a domain for a license, enforcing the license's domain limit.
/// `domain_name` must already be cleaned.
///
/// Runs in an IMMEDIATE transaction so two concurrent registrations of the
/// same pair serialize; the second sees the first's row and returns it.
pub fn register_domain_atomic(
    conn: &mut Connection,
    license_id: &str,
    domain_name: &str,
) -> Result<DomainRegistration> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

    let max_domains: Option<i32> = tx
        .query_row(
            "SELECT max_domains FROM licenses WHERE id = ?1",
            params![license_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| AppError::NotFound("License not found".into()))?;

    let existing: Option<Domain> = query_one(
        &tx,
        &format!(
            "SELECT {} FROM domains WHERE license_id = ?1 AND domain_name = ?2",
            DOMAIN_COLS
        ),
        &[&license_id, &domain_name],
    )?;

    if let Some(domain) = &existing {
        if domain.status != DomainStatus::Pending {
            return Ok(DomainRegistration::Existing(domain.clone()));
        }
    }

    // Pending rows count against the limit only once they go active
    if let Some(limit) = max_domains {
        let active: i32 = tx.query_row(
            "SELECT COUNT(*) FROM domains WHERE license_id = ?1 AND status = 'active'",
            params![license_id],
            |row| row.get(0),
        )?;
        if active >= limit {
            return Err(AppError::Forbidden(format!(
                "Domain limit reached ({}/{})",
                active, limit
            )));
        }
    }

    if let Some(domain) = existing {
        let now = now();
        tx.execute(
            "UPDATE domains SET status = 'active', last_checked_at = ?1 WHERE id = ?2",
            params![now, &domain.id],
        )?;
        tx.commit()?;
        return Ok(DomainRegistration::Activated(Domain {
            status: DomainStatus::Active,
            last_checked_at: Some(now),
            ..domain
        }));
    }

    let id = gen_id();
    let now = now();
    tx.execute(
        "INSERT INTO domains (id, license_id, domain_name, status, last_checked_at, created_at)
         VALUES (?1, ?2, ?3, 'active', ?4, ?5)",
        params![&id, license_id, domain_name, now, now],
    )?;
    tx.commit()?;

    Ok(DomainRegistration::Created(Domain {
        id,
        license_id: license_id.to_string(),
        domain_name: domain_name.to_string(),
        status: DomainStatus::Active,
        last_checked_at: Some(now),
        created_at: now,
    }))
}

/// Insert a domain row with an explicit status, bypassing limits.
/// Used for pre-provisioned (pending) and blocked entries.
pub fn insert_domain(
    conn: &Connection,
    license_id: &str,
    domain_name: &str,
    status: DomainStatus,
) -> Result<Domain> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO domains (id, license_id, domain_name, status, last_checked_at, created_at)
         VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
        params![&id, license_id, domain_name, status.as_ref(), now],
    )?;

    Ok(Domain {
        id,
        license_id: license_id.to_string(),
        domain_name: domain_name.to_string(),
        status,
        last_checked_at: None,
        created_at: now,
    })
}

pub fn list_domains_for_license(conn: &Connection, license_id: &str) -> Result<Vec<Domain>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM domains WHERE license_id = ?1 ORDER BY created_at ASC, rowid ASC",
            DOMAIN_COLS
        ),
        &[&license_id],
    )
}

// ============ Knowledge base ============

pub fn create_kb_category(conn: &Connection, input: &CreateKbCategory) -> Result<KbCategory> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO kb_categories (id, name, slug, requires_serial, requires_purchase_code, product_id, verification_source, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            &id,
            &input.name,
            &input.slug,
            input.requires_serial,
            input.requires_purchase_code,
            &input.product_id,
            input.verification_source.map(|s| s.as_ref().to_string()),
            now
        ],
    )?;

    Ok(KbCategory {
        id,
        name: input.name.clone(),
        slug: input.slug.clone(),
        requires_serial: input.requires_serial,
        requires_purchase_code: input.requires_purchase_code,
        product_id: input.product_id.clone(),
        verification_source: input.verification_source,
        created_at: now,
    })
}

pub fn get_kb_category(conn: &Connection, id: &str) -> Result<Option<KbCategory>> {
    query_one(
        conn,
        &format!("SELECT {} FROM kb_categories WHERE id = ?1", KB_CATEGORY_COLS),
        &[&id],
    )
}

pub fn create_kb_article(conn: &Connection, input: &CreateKbArticle) -> Result<KbArticle> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO kb_articles (id, category_id, title, slug, content, requires_serial, requires_purchase_code, product_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            &id,
            &input.category_id,
            &input.title,
            &input.slug,
            &input.content,
            input.requires_serial,
            input.requires_purchase_code,
            &input.product_id,
            now
        ],
    )?;

    Ok(KbArticle {
        id,
        category_id: input.category_id.clone(),
        title: input.title.clone(),
        slug: input.slug.clone(),
        content: input.content.clone(),
        requires_serial: input.requires_serial,
        requires_purchase_code: input.requires_purchase_code,
        product_id: input.product_id.clone(),
        created_at: now,
    })
}

pub fn get_kb_article(conn: &Connection, id: &str) -> Result<Option<KbArticle>> {
    query_one(
        conn,
        &format!("SELECT {} FROM kb_articles WHERE id = ?1", KB_ARTICLE_COLS),
        &[&id],
    )
}

// ============ Verification Logs ============

pub fn create_verification_log(
    conn: &Connection,
    entry: &NewVerificationLog,
) -> Result<VerificationLog> {
    let now = now();
    let status = entry.status();
    let verified_at = entry.is_valid.then_some(now);
    let response_data = entry
        .response_data
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| AppError::Internal(format!("Failed to encode response data: {}", e)))?;

    conn.execute(
        "INSERT INTO verification_logs (purchase_code_hash, masked_purchase_code, domain, ip_address, user_agent, is_valid, status, verification_source, response_message, response_data, error_details, verified_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            &entry.purchase_code_hash,
            &entry.masked_purchase_code,
            &entry.domain,
            &entry.ip_address,
            &entry.user_agent,
            entry.is_valid,
            status.as_ref(),
            entry.verification_source.as_ref(),
            &entry.response_message,
            response_data,
            &entry.error_details,
            verified_at,
            now
        ],
    )?;

    Ok(VerificationLog {
        id: conn.last_insert_rowid(),
        purchase_code_hash: entry.purchase_code_hash.clone(),
        masked_purchase_code: entry.masked_purchase_code.clone(),
        domain: entry.domain.clone(),
        ip_address: entry.ip_address.clone(),
        user_agent: entry.user_agent.clone(),
        is_valid: entry.is_valid,
        status,
        verification_source: entry.verification_source,
        response_message: entry.response_message.clone(),
        response_data: entry.response_data.clone(),
        error_details: entry.error_details.clone(),
        verified_at,
        created_at: now,
    })
}

pub fn get_verification_log(conn: &Connection, id: i64) -> Result<Option<VerificationLog>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM verification_logs WHERE id = ?1",
            VERIFICATION_LOG_COLS
        ),
        &[&id],
    )
}

/// WHERE clause and its parameters for the log filters.
fn verification_log_filter(query: &VerificationLogQuery) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
    let mut where_clause = String::from("WHERE 1=1");
    let mut filter_params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(ref domain) = query.domain {
        where_clause.push_str(" AND domain LIKE ? ESCAPE '\\'");
        filter_params.push(Box::new(like_pattern(domain)));
    }
    if let Some(status) = query.status {
        where_clause.push_str(" AND status = ?");
        filter_params.push(Box::new(status.as_ref().to_string()));
    }
    if let Some(source) = query.source {
        where_clause.push_str(" AND verification_source = ?");
        filter_params.push(Box::new(source.as_ref().to_string()));
    }
    if let Some(ref ip) = query.ip_address {
        where_clause.push_str(" AND ip_address LIKE ? ESCAPE '\\'");
        filter_params.push(Box::new(like_pattern(ip)));
    }
    if let Some(from_ts) = query.from_timestamp {
        where_clause.push_str(" AND created_at >= ?");
        filter_params.push(Box::new(from_ts));
    }
    if let Some(to_ts) = query.to_timestamp {
        where_clause.push_str(" AND created_at <= ?");
        filter_params.push(Box::new(to_ts));
    }

    (where_clause, filter_params)
}

/// Filtered, paginated log listing, newest first.
/// Returns (entries, total matching rows).
pub fn query_verification_logs(
    conn: &Connection,
    query: &VerificationLogQuery,
) -> Result<(Vec<VerificationLog>, i64)> {
    // Shared between COUNT and SELECT
    let (where_clause, filter_params) = verification_log_filter(query);

    let count_sql = format!("SELECT COUNT(*) FROM verification_logs {}", where_clause);
    let filter_refs: Vec<&dyn rusqlite::ToSql> =
        filter_params.iter().map(|b| b.as_ref()).collect();
    let total: i64 = conn.query_row(&count_sql, filter_refs.as_slice(), |row| row.get(0))?;

    let select_sql = format!(
        "SELECT {} FROM verification_logs {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        VERIFICATION_LOG_COLS, where_clause
    );
    let limit = query.limit();
    let offset = query.offset();
    let mut select_refs = filter_refs;
    select_refs.push(&limit);
    select_refs.push(&offset);

    let logs = query_all(conn, &select_sql, select_refs.as_slice())?;
    Ok((logs, total))
}

/// Every log row matching the filters, newest first. Pagination is ignored.
pub fn export_verification_logs(
    conn: &Connection,
    query: &VerificationLogQuery,
) -> Result<Vec<VerificationLog>> {
    let (where_clause, filter_params) = verification_log_filter(query);
    let filter_refs: Vec<&dyn rusqlite::ToSql> =
        filter_params.iter().map(|b| b.as_ref()).collect();

    query_all(
        conn,
        &format!(
            "SELECT {} FROM verification_logs {} ORDER BY created_at DESC, id DESC",
            VERIFICATION_LOG_COLS, where_clause
        ),
        filter_refs.as_slice(),
    )
}

/// `%needle%` with LIKE wildcards in the needle escaped.
fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Aggregate counts over the last `days` days.
pub fn verification_log_stats(conn: &Connection, days: i64) -> Result<VerificationStats> {
    let now = now();
    let since = now - days * SECONDS_PER_DAY;

    let (total, successful, unique_domains, unique_ips): (i64, i64, i64, i64) = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END), 0),
                COUNT(DISTINCT domain),
                COUNT(DISTINCT ip_address)
         FROM verification_logs WHERE created_at >= ?1",
        params![since],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    )?;

    let failed_last_24h: i64 = conn.query_row(
        "SELECT COUNT(*) FROM verification_logs WHERE status != 'success' AND created_at >= ?1",
        params![now - SECONDS_PER_DAY],
        |row| row.get(0),
    )?;

    let success_rate = if total > 0 {
        (successful as f64 / total as f64 * 10000.0).round() / 100.0
    } else {
        0.0
    };

    Ok(VerificationStats {
        days,
        total_attempts: total,
        successful_attempts: successful,
        failed_attempts: total - successful,
        unique_domains,
        unique_ips,
        failed_last_24h,
        success_rate,
    })
}

/// IPs with at least `min_attempts` non-success attempts in the last `hours`
/// hours, most attempts first.
pub fn suspicious_ips(conn: &Connection, hours: i64, min_attempts: i64) -> Result<Vec<SuspiciousIp>> {
    let since = now() - hours * 3600;
    let mut stmt = conn.prepare(
        "SELECT ip_address, COUNT(*) AS attempts, COUNT(DISTINCT domain), MAX(created_at)
         FROM verification_logs
         WHERE status != 'success' AND ip_address IS NOT NULL AND created_at >= ?1
         GROUP BY ip_address
         HAVING COUNT(*) >= ?2
         ORDER BY attempts DESC, ip_address ASC",
    )?;
    let rows = stmt.query_map(params![since, min_attempts], |row| {
        Ok(SuspiciousIp {
            ip_address: row.get(0)?,
            attempts: row.get(1)?,
            distinct_domains: row.get(2)?,
            last_attempt_at: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Delete log rows older than `retention_days` days. Returns rows deleted.
pub fn purge_verification_logs(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = retention_days
        .checked_mul(SECONDS_PER_DAY)
        .and_then(|window| now().checked_sub(window))
        .ok_or_else(|| AppError::BadRequest("Retention window out of range".into()))?;
    let deleted = conn.execute(
        "DELETE FROM verification_logs WHERE created_at < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}
