//! Shared utility functions for the licensegate application.

use axum::http::HeaderMap;

use crate::models::LicenseType;

pub const SECONDS_PER_DAY: i64 = 86400;

/// Support and license expiry for a newly issued license.
#[derive(Debug, Clone, Copy)]
pub struct LicenseExpirations {
    /// When support ends (None = never)
    pub support_exp: Option<i64>,
    /// When the license itself expires (None = perpetual)
    pub license_exp: Option<i64>,
}

impl LicenseExpirations {
    /// Calculate expirations from the license type's support and trial periods.
    ///
    /// `base_time` is typically `Utc::now().timestamp()` at issue time.
    pub fn for_type(license_type: LicenseType, base_time: i64) -> Self {
        Self::from_days(
            Some(license_type.support_period_days()),
            license_type.license_period_days(),
            base_time,
        )
    }

    /// Expiry from explicit day counts; None means no expiry.
    pub fn from_days(support_days: Option<i64>, license_days: Option<i64>, base_time: i64) -> Self {
        Self {
            support_exp: support_days.map(|days| base_time + days * SECONDS_PER_DAY),
            license_exp: license_days.map(|days| base_time + days * SECONDS_PER_DAY),
        }
    }
}

/// Client IP and user-agent for the verification log. The IP is the first
/// `x-forwarded-for` hop, falling back to `x-real-ip`.
pub fn extract_request_info(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let ip = headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(String::from);

    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    (ip, user_agent)
}

/// Token from `Authorization: Bearer <token>`. None when the header is absent,
/// uses another scheme, or carries an empty token.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}
