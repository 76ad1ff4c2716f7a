//! License registry: licenses, their registered domains, and the status
//! transitions admins can apply.

use chrono::Utc;
use rusqlite::Connection;

use crate::db::queries::{self, DomainRegistration};
use crate::error::{AppError, Result};
use crate::models::{CreateLicense, Domain, DomainStatus, License, LicenseStatus, LicenseType};
use crate::util::LicenseExpirations;
use crate::verification::{BuyerInfo, parse_marketplace_time};

/// Normalize a domain for storage and comparison: lowercase, no scheme,
/// no `www.` prefix, no port or path. A leading `*.` is kept as the
/// wildcard marker. Returns None when nothing usable is left.
pub fn clean_domain(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase();
    let without_scheme = match lowered.find("://") {
        Some(idx) => &lowered[idx + 3..],
        None => lowered.as_str(),
    };
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host);
    let host = host.trim_end_matches('.');

    let (wildcard, host) = match host.strip_prefix("*.") {
        Some(rest) => (true, rest),
        None => (false, host),
    };
    let host = host.strip_prefix("www.").unwrap_or(host);

    let valid = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '.')
        && !host.starts_with('.')
        && !host.contains("..");
    if !valid {
        return None;
    }

    Some(if wildcard {
        format!("*.{}", host)
    } else {
        host.to_string()
    })
}

pub fn find_by_key(conn: &Connection, key: &str) -> Result<License> {
    queries::get_license_by_key(conn, key)?
        .ok_or_else(|| AppError::NotFound("License not found".into()))
}

pub fn get_license(conn: &Connection, license_id: &str) -> Result<License> {
    queries::get_license_by_id(conn, license_id)?
        .ok_or_else(|| AppError::NotFound("License not found".into()))
}

/// Domains registered for a license, oldest first.
pub fn list_domains(conn: &Connection, license_id: &str) -> Result<Vec<Domain>> {
    queries::list_domains_for_license(conn, license_id)
}

/// Register a domain for a license.
///
/// Idempotent per (license, cleaned domain): a repeat returns the existing
/// row, promoting it from pending to active; blocked rows come back as they
/// are. Creating or promoting a domain beyond the license's limit is
/// `Forbidden`.
pub fn register_domain(conn: &mut Connection, license_id: &str, domain_name: &str) -> Result<Domain> {
    let cleaned = clean_domain(domain_name)
        .ok_or_else(|| AppError::BadRequest(format!("Invalid domain: {}", domain_name.trim())))?;

    match queries::register_domain_atomic(conn, license_id, &cleaned)? {
        DomainRegistration::Created(domain) => {
            tracing::info!(license_id, domain = %domain.domain_name, "Domain registered");
            Ok(domain)
        }
        DomainRegistration::Activated(domain) => {
            tracing::info!(license_id, domain = %domain.domain_name, "Pending domain activated");
            Ok(domain)
        }
        DomainRegistration::Existing(domain) => Ok(domain),
    }
}

/// Whether an active registration covers `domain`, directly or by wildcard.
pub fn domain_authorized(conn: &Connection, license_id: &str, domain: &str) -> Result<bool> {
    let Some(cleaned) = clean_domain(domain) else {
        return Ok(false);
    };
    let domains = queries::list_domains_for_license(conn, license_id)?;
    Ok(domains
        .iter()
        .any(|d| d.status == DomainStatus::Active && d.covers(&cleaned)))
}

/// Admin status transition (suspend, expire, reactivate).
pub fn set_status(conn: &Connection, license_id: &str, status: LicenseStatus) -> Result<License> {
    if !queries::update_license_status(conn, license_id, status)? {
        return Err(AppError::NotFound("License not found".into()));
    }
    tracing::info!(license_id, status = status.as_ref(), "License status changed");
    get_license(conn, license_id)
}

pub fn licenses_for_user(conn: &Connection, user_id: &str) -> Result<Vec<License>> {
    queries::list_licenses_for_user(conn, user_id)
}

pub fn user_has_active_license(conn: &Connection, user_id: &str, product_id: &str) -> Result<bool> {
    queries::user_has_active_license(conn, user_id, product_id, Utc::now().timestamp())
}

/// Record a license for a code the marketplace confirmed. Reuses an existing
/// license with the same key. Support runs until the marketplace's
/// `supported_until`, falling back to the regular support period.
pub fn import_marketplace_license(
    conn: &mut Connection,
    code: &str,
    product_id: &str,
    owner_id: Option<&str>,
    buyer: &BuyerInfo,
) -> Result<License> {
    let now = Utc::now().timestamp();
    let support_expires_at = buyer
        .supported_until
        .as_deref()
        .and_then(parse_marketplace_time)
        .or(LicenseExpirations::for_type(LicenseType::Regular, now).support_exp);

    let license = queries::create_license_if_absent(
        conn,
        &CreateLicense {
            key: code.to_string(),
            product_id: product_id.to_string(),
            owner_id: owner_id.map(String::from),
            license_type: LicenseType::Regular,
            support_expires_at,
            license_expires_at: None,
        },
    )?;

    tracing::info!(
        license_id = %license.id,
        product_id,
        item_id = %buyer.item_id,
        "Marketplace license recorded"
    );
    Ok(license)
}
