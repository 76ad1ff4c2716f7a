//! Short-lived KB access tokens.
//!
//! After a caller proves a purchase code for a gated article or category, they
//! get an HS256 token bound to that resource and to the verification log row
//! that holds the proof. Presenting the token later lets the gate reload the
//! proof instead of asking for the code again.

use jwt_simple::prelude::*;

use crate::error::{AppError, Result};
use crate::gate::ResourceKind;

/// Hours an access token stays valid.
pub const ACCESS_TOKEN_TTL_HOURS: u64 = 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KbAccessClaims {
    kind: ResourceKind,
    resource_id: String,
    log_id: i64,
}

pub struct AccessTokenSigner {
    key: HS256Key,
}

impl AccessTokenSigner {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: HS256Key::from_bytes(secret),
        }
    }

    /// Signer with a random key; tokens do not survive a restart.
    pub fn ephemeral() -> Self {
        Self {
            key: HS256Key::generate(),
        }
    }

    pub fn issue(&self, kind: ResourceKind, resource_id: &str, log_id: i64) -> Result<String> {
        let claims = Claims::with_custom_claims(
            KbAccessClaims {
                kind,
                resource_id: resource_id.to_string(),
                log_id,
            },
            Duration::from_hours(ACCESS_TOKEN_TTL_HOURS),
        );
        self.key
            .authenticate(claims)
            .map_err(|e| AppError::Internal(format!("Failed to sign access token: {}", e)))
    }

    /// Returns the verification log id the token points at, or None if the
    /// token is invalid, expired, or was issued for a different resource.
    pub fn verify(&self, token: &str, kind: ResourceKind, resource_id: &str) -> Option<i64> {
        let claims = self.key.verify_token::<KbAccessClaims>(token, None).ok()?;
        let custom = claims.custom;
        (custom.kind == kind && custom.resource_id == resource_id).then_some(custom.log_id)
    }
}
