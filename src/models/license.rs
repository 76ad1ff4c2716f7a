use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LicenseStatus {
    Active,
    Expired,
    Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LicenseType {
    Regular,
    Extended,
    Developer,
    Trial,
}

impl LicenseType {
    /// Domains a license of this type may have active at once (None = unlimited).
    pub fn max_domains(self) -> Option<i32> {
        match self {
            LicenseType::Regular => Some(1),
            LicenseType::Extended => Some(5),
            LicenseType::Developer => None,
            LicenseType::Trial => Some(1),
        }
    }

    pub fn support_period_days(self) -> i64 {
        match self {
            LicenseType::Regular | LicenseType::Extended => 365,
            LicenseType::Developer => 730,
            LicenseType::Trial => 30,
        }
    }

    /// Only trials stop working on their own.
    pub fn license_period_days(self) -> Option<i64> {
        match self {
            LicenseType::Trial => Some(30),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub id: String,
    /// The purchase code / serial. Never echoed back in API responses.
    #[serde(skip_serializing)]
    pub key: String,
    pub product_id: String,
    /// None for marketplace imports nobody has claimed yet
    pub owner_id: Option<String>,
    pub status: LicenseStatus,
    pub license_type: LicenseType,
    /// Fixed from the license type at issue time (None = unlimited)
    pub max_domains: Option<i32>,
    pub support_expires_at: Option<i64>,
    pub license_expires_at: Option<i64>,
    pub created_at: i64,
}

impl License {
    /// Active status and not past its expiry.
    pub fn is_active(&self, now: i64) -> bool {
        self.status == LicenseStatus::Active
            && self.license_expires_at.map(|exp| exp > now).unwrap_or(true)
    }

    /// Stored status, except that an active license past its expiry reports `expired`.
    pub fn effective_status(&self, now: i64) -> LicenseStatus {
        match self.status {
            LicenseStatus::Active if !self.is_active(now) => LicenseStatus::Expired,
            status => status,
        }
    }

    pub fn support_active(&self, now: i64) -> bool {
        self.support_expires_at.map(|exp| exp > now).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateLicense {
    pub key: String,
    pub product_id: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    pub license_type: LicenseType,
    #[serde(default)]
    pub support_expires_at: Option<i64>,
    #[serde(default)]
    pub license_expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateLicenseStatus {
    pub status: LicenseStatus,
}
