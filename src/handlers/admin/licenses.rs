use axum::extract::State;
use serde::Serialize;

use crate::db::AppState;
use crate::error::Result;
use crate::extractors::{Json, Path};
use crate::models::{Domain, License, UpdateLicenseStatus};
use crate::registry;

#[derive(Debug, Serialize)]
pub struct LicenseDomainsResponse {
    pub license_id: String,
    pub max_domains: Option<i32>,
    pub domains: Vec<Domain>,
}

/// GET /admin/licenses/{id}/domains
pub async fn list_license_domains(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LicenseDomainsResponse>> {
    let conn = state.db.get()?;
    let license = registry::get_license(&conn, &id)?;
    let domains = registry::list_domains(&conn, &license.id)?;

    Ok(Json(LicenseDomainsResponse {
        license_id: license.id,
        max_domains: license.max_domains,
        domains,
    }))
}

/// PUT /admin/licenses/{id}/status - Suspend, expire or reactivate a license
pub async fn update_license_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<UpdateLicenseStatus>,
) -> Result<Json<License>> {
    let conn = state.db.get()?;
    let license = registry::set_status(&conn, &id, input.status)?;
    Ok(Json(license))
}
