use axum::{extract::State, http::HeaderMap};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::models::{
    Domain, DomainStatus, License, LicenseStatus, LicenseType, VerificationStatus,
};
use crate::registry;
use crate::util::extract_request_info;
use crate::verification::VerificationRequest;

pub const DOMAIN_NOT_AUTHORIZED: &str = "DOMAIN_NOT_AUTHORIZED";

#[derive(Debug, Deserialize)]
pub struct VerifyLicenseRequest {
    pub purchase_code: String,
    pub domain: String,
    #[serde(default)]
    pub product_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyLicenseResponse {
    pub valid: bool,
    pub status: VerificationStatus,
    pub message: String,
    pub masked_purchase_code: String,
    pub log_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<License>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<Domain>,
}

/// POST /license/verify - Verify a purchase code for a domain
///
/// A valid code that resolves to a license also registers the domain
/// against it. A blocked domain or a full domain quota turns the answer
/// into `valid: false` with `DOMAIN_NOT_AUTHORIZED`.
pub async fn verify_license(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<VerifyLicenseRequest>,
) -> Result<Json<VerifyLicenseResponse>> {
    if registry::clean_domain(&req.domain).is_none() {
        return Err(AppError::BadRequest(format!(
            "Invalid domain: {}",
            req.domain.trim()
        )));
    }

    let product = match &req.product_id {
        Some(product_id) => {
            let conn = state.db.get()?;
            Some(
                queries::get_product_by_id(&conn, product_id)?
                    .ok_or_else(|| AppError::NotFound("Product not found".into()))?,
            )
        }
        None => None,
    };

    let (ip_address, user_agent) = extract_request_info(&headers);
    let outcome = state
        .verifier
        .verify_request(VerificationRequest {
            raw_code: &req.purchase_code,
            domain: &req.domain,
            ip_address: ip_address.as_deref(),
            user_agent: user_agent.as_deref(),
            product: product.as_ref(),
            source: None,
        })
        .await?;

    let log = outcome.log;
    let mut response = VerifyLicenseResponse {
        valid: log.is_valid,
        status: log.status,
        message: log.response_message.clone(),
        masked_purchase_code: log.masked_purchase_code.clone(),
        log_id: log.id,
        error_code: None,
        license: None,
        domain: None,
    };

    let Some(verdict) = outcome.verdict.filter(|v| v.is_valid) else {
        return Ok(Json(response));
    };

    let mut conn = state.db.get()?;
    let license = match (&verdict.license_id, &verdict.buyer, &product) {
        (Some(license_id), _, _) => queries::get_license_by_id(&conn, license_id)?,
        (None, Some(buyer), Some(product)) => Some(registry::import_marketplace_license(
            &mut conn,
            req.purchase_code.trim(),
            &product.id,
            None,
            buyer,
        )?),
        _ => None,
    };

    let Some(license) = license else {
        return Ok(Json(response));
    };

    match registry::register_domain(&mut conn, &license.id, &req.domain) {
        Ok(domain) if domain.status == DomainStatus::Blocked => {
            tracing::warn!(license_id = %license.id, domain = %domain.domain_name, "Blocked domain rejected");
            response.valid = false;
            response.error_code = Some(DOMAIN_NOT_AUTHORIZED);
            response.message = "Domain is blocked for this license".to_string();
        }
        Ok(domain) => response.domain = Some(domain),
        Err(AppError::Forbidden(msg)) => {
            tracing::warn!(license_id = %license.id, "Domain rejected: {}", msg);
            response.valid = false;
            response.error_code = Some(DOMAIN_NOT_AUTHORIZED);
            response.message = msg;
        }
        Err(e) => return Err(e),
    }

    response.license = Some(license);
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
pub struct LicenseStatusResponse {
    pub valid: bool,
    pub status: LicenseStatus,
    pub license_type: LicenseType,
    pub expires_at: Option<i64>,
    pub support_expires_at: Option<i64>,
    pub support_active: bool,
    pub max_domains: Option<i32>,
    pub domains: Vec<Domain>,
}

/// GET /license/status - License status for the key in the Authorization header
/// (never in the URL)
pub async fn license_status(
    State(state): State<AppState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<LicenseStatusResponse>> {
    let conn = state.db.get()?;
    let license = registry::find_by_key(&conn, auth.token())?;
    let domains = registry::list_domains(&conn, &license.id)?;
    let now = Utc::now().timestamp();

    Ok(Json(LicenseStatusResponse {
        valid: license.is_active(now),
        status: license.effective_status(now),
        license_type: license.license_type,
        expires_at: license.license_expires_at,
        support_expires_at: license.support_expires_at,
        support_active: license.support_active(now),
        max_domains: license.max_domains,
        domains,
    }))
}
