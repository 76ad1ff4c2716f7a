use serde::{Deserialize, Serialize};

use super::VerificationSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbCategory {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub requires_serial: bool,
    pub requires_purchase_code: bool,
    pub product_id: Option<String>,
    /// Pins where codes for this category are checked (None = deployment default)
    pub verification_source: Option<VerificationSource>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbArticle {
    pub id: String,
    pub category_id: String,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub requires_serial: bool,
    pub requires_purchase_code: bool,
    pub product_id: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateKbCategory {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub requires_serial: bool,
    #[serde(default)]
    pub requires_purchase_code: bool,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub verification_source: Option<VerificationSource>,
}

#[derive(Debug, Deserialize)]
pub struct CreateKbArticle {
    pub category_id: String,
    pub title: String,
    pub slug: String,
    pub content: String,
    #[serde(default)]
    pub requires_serial: bool,
    #[serde(default)]
    pub requires_purchase_code: bool,
    #[serde(default)]
    pub product_id: Option<String>,
}
