use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub slug: String,
    /// Marketplace item id that purchase codes for this product must belong to
    pub marketplace_item_id: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateProduct {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub marketplace_item_id: Option<String>,
}
