//! Shared fixtures for integration tests.
//!
//! Every test gets its own SQLite file inside a temp dir so pooled
//! connections share one database. Keep the returned context alive for the
//! duration of the test; dropping it removes the directory.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::Response;
use rusqlite::Connection;
use serde_json::Value;
use tempfile::TempDir;

pub use licensegate::db::{self, AppState, DbPool, queries};
pub use licensegate::jwt::AccessTokenSigner;
pub use licensegate::models::*;
pub use licensegate::verification::{
    BuyerInfo, PurchaseCodeSource, PurchaseCodeVerifier, SourceError, SourceFuture, SourceQuery,
    SourceVerdict, VerifierConfig,
};

pub const ADMIN_TOKEN: &str = "test-admin-token";
pub const ACCESS_SECRET: &[u8] = b"test-access-token-secret-32bytes";

pub struct TestDb {
    pub pool: DbPool,
    _dir: TempDir,
}

pub fn test_db() -> TestDb {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("licensegate-test.db");
    let pool = db::create_pool(path.to_str().expect("utf-8 temp path")).expect("create pool");
    {
        let conn = pool.get().unwrap();
        db::init_db(&conn).unwrap();
    }
    TestDb { pool, _dir: dir }
}

pub struct TestContext {
    pub state: AppState,
    pub db: TestDb,
}

impl TestContext {
    pub fn app(&self) -> Router {
        licensegate::app(self.state.clone())
    }

    pub fn conn(&self) -> r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager> {
        self.db.pool.get().unwrap()
    }
}

/// App state with the real local source and no marketplace.
pub fn create_test_app_state() -> TestContext {
    create_test_app_state_with(|verifier| verifier)
}

/// App state whose verifier is customized by `configure` (stub sources,
/// default source, timeout).
pub fn create_test_app_state_with(
    configure: impl FnOnce(PurchaseCodeVerifier) -> PurchaseCodeVerifier,
) -> TestContext {
    create_test_app_state_with_config(VerifierConfig::default(), configure)
}

pub fn create_test_app_state_with_config(
    config: VerifierConfig,
    configure: impl FnOnce(PurchaseCodeVerifier) -> PurchaseCodeVerifier,
) -> TestContext {
    let db = test_db();
    let verifier = configure(PurchaseCodeVerifier::new(db.pool.clone(), config));
    let state = AppState {
        db: db.pool.clone(),
        verifier: Arc::new(verifier),
        access_tokens: Arc::new(AccessTokenSigner::new(ACCESS_SECRET)),
        admin_token: Some(ADMIN_TOKEN.to_string()),
    };
    TestContext { state, db }
}

pub fn marketplace_config() -> VerifierConfig {
    VerifierConfig {
        default_source: VerificationSource::MarketplaceApi,
        timeout: Duration::from_millis(200),
    }
}

// ============ Fixtures ============

pub fn create_test_user(conn: &Connection, email: &str) -> (User, String) {
    queries::create_user(
        conn,
        &CreateUser {
            email: email.to_string(),
            name: "Test User".to_string(),
        },
    )
    .expect("create user")
}

pub fn create_test_product(conn: &Connection, slug: &str, marketplace_item_id: Option<&str>) -> Product {
    queries::create_product(
        conn,
        &CreateProduct {
            name: format!("Product {}", slug),
            slug: slug.to_string(),
            marketplace_item_id: marketplace_item_id.map(String::from),
        },
    )
    .expect("create product")
}

pub fn create_test_license(
    conn: &Connection,
    key: &str,
    product_id: &str,
    owner_id: Option<&str>,
    license_type: LicenseType,
) -> License {
    queries::create_license(
        conn,
        &CreateLicense {
            key: key.to_string(),
            product_id: product_id.to_string(),
            owner_id: owner_id.map(String::from),
            license_type,
            support_expires_at: Some(chrono::Utc::now().timestamp() + 86400 * 365),
            license_expires_at: None,
        },
    )
    .expect("create license")
}

pub fn create_test_category(
    conn: &Connection,
    slug: &str,
    requires_serial: bool,
    requires_purchase_code: bool,
    product_id: Option<&str>,
) -> KbCategory {
    queries::create_kb_category(
        conn,
        &CreateKbCategory {
            name: format!("Category {}", slug),
            slug: slug.to_string(),
            requires_serial,
            requires_purchase_code,
            product_id: product_id.map(String::from),
            verification_source: None,
        },
    )
    .expect("create category")
}

pub fn create_test_article(
    conn: &Connection,
    category_id: &str,
    slug: &str,
    requires_serial: bool,
    requires_purchase_code: bool,
    product_id: Option<&str>,
) -> KbArticle {
    queries::create_kb_article(
        conn,
        &CreateKbArticle {
            category_id: category_id.to_string(),
            title: format!("Article {}", slug),
            slug: slug.to_string(),
            content: format!("Body of {}", slug),
            requires_serial,
            requires_purchase_code,
            product_id: product_id.map(String::from),
        },
    )
    .expect("create article")
}

pub fn count_verification_logs(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM verification_logs", [], |row| row.get(0))
        .unwrap()
}

/// Shift a log row into the past.
pub fn backdate_log(conn: &Connection, log_id: i64, seconds: i64) {
    conn.execute(
        "UPDATE verification_logs SET created_at = created_at - ?1 WHERE id = ?2",
        rusqlite::params![seconds, log_id],
    )
    .unwrap();
}

pub fn new_log_entry(domain: &str, ip: Option<&str>, is_valid: bool) -> NewVerificationLog {
    NewVerificationLog {
        purchase_code_hash: "0".repeat(64),
        masked_purchase_code: "ABCD********WXYZ".to_string(),
        domain: domain.to_string(),
        ip_address: ip.map(String::from),
        user_agent: None,
        is_valid,
        verification_source: VerificationSource::Local,
        response_message: if is_valid { "ok" } else { "nope" }.to_string(),
        response_data: None,
        error_details: None,
    }
}

// ============ Stub sources ============

#[derive(Clone)]
pub enum StubBehavior {
    Valid(Option<BuyerInfo>),
    Invalid(&'static str),
    Hang,
    Fail(&'static str),
}

/// Marketplace stand-in that answers from a fixed script and counts calls.
#[derive(Clone)]
pub struct StubSource {
    pub behavior: StubBehavior,
    pub calls: Arc<AtomicUsize>,
}

impl StubSource {
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PurchaseCodeSource for StubSource {
    fn kind(&self) -> VerificationSource {
        VerificationSource::MarketplaceApi
    }

    fn check<'a>(&'a self, query: SourceQuery<'a>) -> SourceFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            match &self.behavior {
                StubBehavior::Valid(buyer) => Ok(SourceVerdict {
                    is_valid: true,
                    message: "Purchase code is valid".to_string(),
                    product_id: query.product.map(|p| p.id.clone()),
                    buyer: buyer.clone(),
                    ..Default::default()
                }),
                StubBehavior::Invalid(msg) => Ok(SourceVerdict::invalid(*msg)),
                StubBehavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(SourceVerdict::invalid("unreachable"))
                }
                StubBehavior::Fail(msg) => Err(SourceError::Transport(msg.to_string())),
            }
        })
    }
}

pub fn buyer(item_id: &str) -> BuyerInfo {
    BuyerInfo {
        item_id: item_id.to_string(),
        buyer: Some("marketbuyer".to_string()),
        license: Some("Regular License".to_string()),
        sold_at: Some("2024-01-01T10:00:00+10:00".to_string()),
        supported_until: Some("2030-01-01T00:00:00+00:00".to_string()),
    }
}

// ============ HTTP helpers ============

pub async fn body_json(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).expect("Response should be valid JSON")
}

pub fn json_request(method: &str, uri: &str, body: Value) -> axum::http::Request<Body> {
    axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get_request(uri: &str, bearer: Option<&str>) -> axum::http::Request<Body> {
    let mut builder = axum::http::Request::builder().method("GET").uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn authed_json_request(
    method: &str,
    uri: &str,
    bearer: &str,
    body: Value,
) -> axum::http::Request<Body> {
    axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("Authorization", format!("Bearer {}", bearer))
        .body(Body::from(body.to_string()))
        .unwrap()
}
