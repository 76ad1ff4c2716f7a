//! Purchase-code verification.
//!
//! A [`PurchaseCodeVerifier`] checks a code against one [`PurchaseCodeSource`]
//! (the local license registry or the marketplace API), bounds the call with a
//! timeout, and writes exactly one verification log row per attempt. Source
//! failures never escape as errors; they become `error` rows.

mod envato;
mod local;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::db::DbPool;
use crate::error::{AppError, Result};
use crate::models::{NewVerificationLog, Product, VerificationLog, VerificationSource, VerificationStatus};
use crate::verification_log;

pub use envato::{EnvatoClient, EnvatoConfig, EnvatoItem, EnvatoSale, parse_marketplace_time};
pub use local::LocalSource;

pub type SourceFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<SourceVerdict, SourceError>> + Send + 'a>>;

/// Where purchase codes are checked.
pub trait PurchaseCodeSource: Send + Sync {
    fn kind(&self) -> VerificationSource;

    fn check<'a>(&'a self, query: SourceQuery<'a>) -> SourceFuture<'a>;
}

#[derive(Debug, Clone, Copy)]
pub struct SourceQuery<'a> {
    /// Trimmed, otherwise exactly as submitted
    pub code: &'a str,
    /// Set when the check is scoped to one product
    pub product: Option<&'a Product>,
}

/// Buyer details returned by the marketplace for a valid sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyerInfo {
    pub item_id: String,
    pub buyer: Option<String>,
    pub license: Option<String>,
    pub sold_at: Option<String>,
    pub supported_until: Option<String>,
}

/// A source's answer for a code it could evaluate.
#[derive(Debug, Clone, Default)]
pub struct SourceVerdict {
    pub is_valid: bool,
    pub message: String,
    pub license_id: Option<String>,
    pub product_id: Option<String>,
    pub buyer: Option<BuyerInfo>,
    pub response_data: Option<serde_json::Value>,
}

impl SourceVerdict {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            message: message.into(),
            ..Default::default()
        }
    }
}

/// The source could not answer.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("timeout")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("source not configured: {0}")]
    NotConfigured(&'static str),

    #[error("license registry unavailable: {0}")]
    Registry(String),
}

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Deployment default; KB categories may pin a different source
    pub default_source: VerificationSource,
    /// Upper bound on a single source call
    pub timeout: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            default_source: VerificationSource::Local,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VerificationRequest<'a> {
    pub raw_code: &'a str,
    pub domain: &'a str,
    pub ip_address: Option<&'a str>,
    pub user_agent: Option<&'a str>,
    pub product: Option<&'a Product>,
    /// Overrides the default source (category pinning); never caller-chosen
    pub source: Option<VerificationSource>,
}

#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    /// The row written for this attempt
    pub log: VerificationLog,
    /// None when the source failed
    pub verdict: Option<SourceVerdict>,
}

pub struct PurchaseCodeVerifier {
    pool: DbPool,
    config: VerifierConfig,
    local: Arc<dyn PurchaseCodeSource>,
    marketplace: Option<Arc<dyn PurchaseCodeSource>>,
}

impl PurchaseCodeVerifier {
    /// Verifier backed by the local registry; no marketplace source.
    pub fn new(pool: DbPool, config: VerifierConfig) -> Self {
        Self {
            local: Arc::new(LocalSource::new(pool.clone())),
            pool,
            config,
            marketplace: None,
        }
    }

    pub fn with_marketplace(mut self, source: Arc<dyn PurchaseCodeSource>) -> Self {
        self.marketplace = Some(source);
        self
    }

    pub fn with_local(mut self, source: Arc<dyn PurchaseCodeSource>) -> Self {
        self.local = source;
        self
    }

    pub fn default_source(&self) -> VerificationSource {
        self.config.default_source
    }

    /// Verify a code against the default source and log the attempt.
    pub async fn verify(
        &self,
        raw_code: &str,
        domain: &str,
        ip_address: Option<&str>,
    ) -> Result<VerificationLog> {
        let outcome = self
            .verify_request(VerificationRequest {
                raw_code,
                domain,
                ip_address,
                user_agent: None,
                product: None,
                source: None,
            })
            .await?;
        Ok(outcome.log)
    }

    pub async fn verify_request(&self, req: VerificationRequest<'_>) -> Result<VerificationOutcome> {
        let code = req.raw_code.trim();
        if code.is_empty() {
            return Err(AppError::BadRequest("Purchase code is required".into()));
        }
        let domain = req.domain.trim();
        if domain.is_empty() {
            return Err(AppError::BadRequest("Domain is required".into()));
        }

        let source_kind = req.source.unwrap_or(self.config.default_source);
        let query = SourceQuery {
            code,
            product: req.product,
        };

        let result = match self.source_for(source_kind) {
            Some(source) => {
                match tokio::time::timeout(self.config.timeout, source.check(query)).await {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::Timeout),
                }
            }
            None => Err(SourceError::NotConfigured(source_kind_name(source_kind))),
        };

        let mut entry = NewVerificationLog {
            purchase_code_hash: hash_purchase_code(code),
            masked_purchase_code: mask_purchase_code(code),
            domain: domain.to_string(),
            ip_address: req.ip_address.map(String::from),
            user_agent: req.user_agent.map(String::from),
            is_valid: false,
            verification_source: source_kind,
            response_message: String::new(),
            response_data: None,
            error_details: None,
        };

        let verdict = match result {
            Ok(verdict) => {
                entry.is_valid = verdict.is_valid;
                entry.response_message = verdict.message.clone();
                entry.response_data = verdict.response_data.clone();
                Some(verdict)
            }
            Err(e) => {
                entry.response_message = "Verification could not be completed".to_string();
                entry.error_details = Some(e.to_string());
                None
            }
        };

        let log = verification_log::append(&self.pool, entry).await?;

        match log.status {
            VerificationStatus::Success => tracing::info!(
                log_id = log.id,
                source = log.verification_source.as_ref(),
                domain = %log.domain,
                "Purchase code verified"
            ),
            VerificationStatus::Failed => tracing::warn!(
                log_id = log.id,
                code_hash = %log.purchase_code_hash,
                domain = %log.domain,
                message = %log.response_message,
                "Purchase code rejected"
            ),
            VerificationStatus::Error => tracing::error!(
                log_id = log.id,
                code_hash = %log.purchase_code_hash,
                source = log.verification_source.as_ref(),
                error = log.error_details.as_deref().unwrap_or_default(),
                "Purchase code verification failed"
            ),
        }

        Ok(VerificationOutcome { log, verdict })
    }

    fn source_for(&self, kind: VerificationSource) -> Option<&Arc<dyn PurchaseCodeSource>> {
        match kind {
            VerificationSource::Local => Some(&self.local),
            VerificationSource::MarketplaceApi => self.marketplace.as_ref(),
        }
    }
}

fn source_kind_name(kind: VerificationSource) -> &'static str {
    match kind {
        VerificationSource::Local => "local",
        VerificationSource::MarketplaceApi => "marketplace-api",
    }
}

/// SHA-256 of the trimmed code, hex encoded.
pub fn hash_purchase_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

/// Same character length as the code, with at most 4 characters visible at
/// each end and never more than a quarter of the code per side.
pub fn mask_purchase_code(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    let len = chars.len();
    let visible = (len / 4).min(4);

    let mut masked = String::with_capacity(code.len());
    masked.extend(&chars[..visible]);
    masked.extend(std::iter::repeat_n('*', len - 2 * visible));
    masked.extend(&chars[len - visible..]);
    masked
}
