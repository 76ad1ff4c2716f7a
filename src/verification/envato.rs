use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, Result};
use crate::models::VerificationSource;

use super::{BuyerInfo, PurchaseCodeSource, SourceError, SourceFuture, SourceQuery, SourceVerdict};

#[derive(Debug, Clone)]
pub struct EnvatoConfig {
    pub api_token: String,
    pub base_url: String,
    pub timeout: Duration,
}

/// Sale record from `GET /v3/market/author/sale`.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvatoSale {
    pub item: Option<EnvatoItem>,
    pub buyer: Option<String>,
    pub license: Option<String>,
    pub sold_at: Option<String>,
    pub supported_until: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnvatoItem {
    /// Numeric in practice; accepted as a string too
    pub id: Option<serde_json::Value>,
    pub name: Option<String>,
}

impl EnvatoSale {
    fn item_id(&self) -> Option<String> {
        match self.item.as_ref()?.id.as_ref()? {
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnvatoClient {
    client: Client,
    api_token: String,
    base_url: String,
}

impl EnvatoClient {
    pub fn new(config: &EnvatoConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build Envato client: {}", e)))?;

        Ok(Self {
            client,
            api_token: config.api_token.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Look up a sale by purchase code. `Ok(None)` means the marketplace does
    /// not know the code.
    pub async fn fetch_sale(&self, code: &str) -> std::result::Result<Option<EnvatoSale>, SourceError> {
        let response = self
            .client
            .get(format!("{}/v3/market/author/sale", self.base_url))
            .query(&[("code", code)])
            .header("Authorization", format!("Bearer {}", self.api_token))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(SourceError::Transport(format!(
                "Envato API returned {}",
                response.status()
            )));
        }

        let body = response.text().await.map_err(transport_error)?;
        let sale: EnvatoSale = serde_json::from_str(&body)
            .map_err(|e| SourceError::Malformed(format!("Failed to parse Envato response: {}", e)))?;
        Ok(Some(sale))
    }

    async fn check_code(&self, query: SourceQuery<'_>) -> std::result::Result<SourceVerdict, SourceError> {
        let Some(sale) = self.fetch_sale(query.code).await? else {
            return Ok(SourceVerdict::invalid("Invalid purchase code"));
        };

        let item_id = sale
            .item_id()
            .ok_or_else(|| SourceError::Malformed("missing item.id".into()))?;

        if let Some(expected) = query.product.and_then(|p| p.marketplace_item_id.as_deref()) {
            if expected != item_id {
                return Ok(SourceVerdict::invalid(
                    "Purchase code does not belong to this product",
                ));
            }
        }

        let buyer = BuyerInfo {
            item_id,
            buyer: sale.buyer,
            license: sale.license,
            sold_at: sale.sold_at,
            supported_until: sale.supported_until,
        };

        Ok(SourceVerdict {
            is_valid: true,
            message: "Purchase code is valid".to_string(),
            license_id: None,
            product_id: query.product.map(|p| p.id.clone()),
            response_data: Some(json!({
                "item_id": buyer.item_id,
                "item_name": sale.item.and_then(|i| i.name),
                "buyer": buyer.buyer,
                "license": buyer.license,
                "sold_at": buyer.sold_at,
                "supported_until": buyer.supported_until,
            })),
            buyer: Some(buyer),
        })
    }
}

fn transport_error(e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout
    } else {
        SourceError::Transport(e.to_string())
    }
}

impl PurchaseCodeSource for EnvatoClient {
    fn kind(&self) -> VerificationSource {
        VerificationSource::MarketplaceApi
    }

    fn check<'a>(&'a self, query: SourceQuery<'a>) -> SourceFuture<'a> {
        Box::pin(self.check_code(query))
    }
}

/// Parse a marketplace timestamp (RFC 3339) into unix seconds.
pub fn parse_marketplace_time(value: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.timestamp())
}
