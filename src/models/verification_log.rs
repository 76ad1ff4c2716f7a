use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VerificationStatus {
    Success,
    Failed,
    /// The source could not give an answer (timeout, transport, bad payload)
    Error,
}

impl VerificationStatus {
    pub fn badge_class(self) -> &'static str {
        match self {
            VerificationStatus::Success => "bg-success",
            VerificationStatus::Failed => "bg-danger",
            VerificationStatus::Error => "bg-warning",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum VerificationSource {
    Local,
    MarketplaceApi,
}

impl VerificationSource {
    pub fn badge_class(self) -> &'static str {
        match self {
            VerificationSource::Local => "bg-secondary",
            VerificationSource::MarketplaceApi => "bg-primary",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum IpType {
    Ipv4,
    Ipv6,
    Unknown,
}

impl IpType {
    pub fn of(ip: Option<&str>) -> Self {
        match ip.and_then(|ip| ip.trim().parse::<IpAddr>().ok()) {
            Some(IpAddr::V4(_)) => IpType::Ipv4,
            Some(IpAddr::V6(_)) => IpType::Ipv6,
            None => IpType::Unknown,
        }
    }
}

/// One purchase-code verification attempt. Rows are append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationLog {
    pub id: i64,
    pub purchase_code_hash: String,
    pub masked_purchase_code: String,
    pub domain: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub is_valid: bool,
    pub status: VerificationStatus,
    pub verification_source: VerificationSource,
    pub response_message: String,
    pub response_data: Option<serde_json::Value>,
    pub error_details: Option<String>,
    /// Set only for valid attempts
    pub verified_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewVerificationLog {
    pub purchase_code_hash: String,
    pub masked_purchase_code: String,
    pub domain: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub is_valid: bool,
    pub verification_source: VerificationSource,
    pub response_message: String,
    pub response_data: Option<serde_json::Value>,
    pub error_details: Option<String>,
}

impl NewVerificationLog {
    /// success when valid, error when the source failed, failed otherwise
    pub fn status(&self) -> VerificationStatus {
        if self.is_valid {
            VerificationStatus::Success
        } else if self.error_details.is_some() {
            VerificationStatus::Error
        } else {
            VerificationStatus::Failed
        }
    }
}

/// Log entry with the display fields the admin screens render.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationLogView {
    #[serde(flatten)]
    pub log: VerificationLog,
    pub status_badge_class: &'static str,
    pub source_badge_class: &'static str,
    pub ip_type: IpType,
}

impl From<VerificationLog> for VerificationLogView {
    fn from(log: VerificationLog) -> Self {
        Self {
            status_badge_class: log.status.badge_class(),
            source_badge_class: log.verification_source.badge_class(),
            ip_type: IpType::of(log.ip_address.as_deref()),
            log,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct VerificationLogQuery {
    /// Substring match
    pub domain: Option<String>,
    pub status: Option<VerificationStatus>,
    pub source: Option<VerificationSource>,
    /// Substring match
    pub ip_address: Option<String>,
    pub from_timestamp: Option<i64>,
    pub to_timestamp: Option<i64>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl VerificationLogQuery {
    pub const DEFAULT_PER_PAGE: i64 = 20;
    pub const MAX_PER_PAGE: i64 = 100;

    pub fn limit(&self) -> i64 {
        self.per_page
            .unwrap_or(Self::DEFAULT_PER_PAGE)
            .clamp(1, Self::MAX_PER_PAGE)
    }

    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.limit()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationStats {
    pub days: i64,
    pub total_attempts: i64,
    pub successful_attempts: i64,
    /// failed + error
    pub failed_attempts: i64,
    pub unique_domains: i64,
    pub unique_ips: i64,
    pub failed_last_24h: i64,
    /// Percentage, 0 when there were no attempts
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuspiciousIp {
    pub ip_address: String,
    pub attempts: i64,
    pub distinct_domains: i64,
    pub last_attempt_at: i64,
}
