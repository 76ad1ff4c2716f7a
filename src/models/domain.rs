use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DomainStatus {
    Pending,
    Active,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub id: String,
    pub license_id: String,
    /// Cleaned form; a leading `*.` marks a wildcard
    pub domain_name: String,
    pub status: DomainStatus,
    pub last_checked_at: Option<i64>,
    pub created_at: i64,
}

impl Domain {
    pub fn is_wildcard(&self) -> bool {
        self.domain_name.starts_with("*.")
    }

    /// Whether this registration covers `domain` (already cleaned).
    /// `*.example.com` covers `example.com` and every subdomain of it.
    pub fn covers(&self, domain: &str) -> bool {
        match self.domain_name.strip_prefix("*.") {
            Some(base) => {
                domain == base
                    || domain
                        .strip_suffix(base)
                        .map(|rest| rest.ends_with('.'))
                        .unwrap_or(false)
            }
            None => self.domain_name == domain,
        }
    }
}
