use chrono::Utc;
use serde_json::json;

use crate::db::{DbPool, queries};
use crate::models::{LicenseStatus, VerificationSource};

use super::{PurchaseCodeSource, SourceError, SourceFuture, SourceQuery, SourceVerdict};

/// Checks codes against licenses issued by this deployment.
pub struct LocalSource {
    pool: DbPool,
}

impl LocalSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn lookup(&self, query: SourceQuery<'_>) -> Result<SourceVerdict, SourceError> {
        let conn = self
            .pool
            .get()
            .map_err(|e| SourceError::Registry(e.to_string()))?;
        let license = queries::get_license_by_key(&conn, query.code)
            .map_err(|e| SourceError::Registry(e.to_string()))?;

        let Some(license) = license else {
            return Ok(SourceVerdict::invalid("License code is invalid"));
        };

        if let Some(product) = query.product {
            if license.product_id != product.id {
                return Ok(SourceVerdict::invalid(
                    "License code does not belong to this product",
                ));
            }
        }

        let now = Utc::now().timestamp();
        let message = match (license.status, license.effective_status(now)) {
            (LicenseStatus::Suspended, _) => Some("License is suspended"),
            (LicenseStatus::Expired, _) => Some("License is expired"),
            (LicenseStatus::Active, LicenseStatus::Expired) => Some("License has expired"),
            _ => None,
        };
        if let Some(message) = message {
            return Ok(SourceVerdict {
                license_id: Some(license.id.clone()),
                product_id: Some(license.product_id.clone()),
                ..SourceVerdict::invalid(message)
            });
        }

        Ok(SourceVerdict {
            is_valid: true,
            message: "License code is valid".to_string(),
            response_data: Some(json!({
                "license_id": license.id,
                "product_id": license.product_id,
                "license_type": license.license_type,
                "support_expires_at": license.support_expires_at,
                "license_expires_at": license.license_expires_at,
            })),
            license_id: Some(license.id),
            product_id: Some(license.product_id),
            buyer: None,
        })
    }
}

impl PurchaseCodeSource for LocalSource {
    fn kind(&self) -> VerificationSource {
        VerificationSource::Local
    }

    fn check<'a>(&'a self, query: SourceQuery<'a>) -> SourceFuture<'a> {
        Box::pin(async move { self.lookup(query) })
    }
}
