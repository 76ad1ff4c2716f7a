use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde_json::json;

use licensegate::verification::{EnvatoClient, EnvatoConfig};

use crate::common::*;

const API_TOKEN: &str = "envato-personal-token";

/// Stand-in for the marketplace sale endpoint. The code selects the reply.
async fn fake_sale(headers: HeaderMap, Query(params): Query<HashMap<String, String>>) -> Response {
    let expected = format!("Bearer {}", API_TOKEN);
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some(expected.as_str()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    match params.get("code").map(String::as_str) {
        Some("valid-code") => axum::Json(json!({
            "item": {"id": 12345, "name": "Sample Theme"},
            "buyer": "marketbuyer",
            "license": "Regular License",
            "sold_at": "2024-01-01T10:00:00+10:00",
            "supported_until": "2030-01-01T00:00:00+00:00",
        }))
        .into_response(),
        Some("no-item") => axum::Json(json!({"buyer": "marketbuyer"})).into_response(),
        Some("garbled") => (StatusCode::OK, "<html>maintenance</html>").into_response(),
        Some("server-error") => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        Some("slow") => {
            tokio::time::sleep(Duration::from_secs(5)).await;
            StatusCode::NOT_FOUND.into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn spawn_fake_marketplace() -> String {
    let app = Router::new().route("/v3/market/author/sale", get(fake_sale));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn client(base_url: &str, token: &str, timeout: Duration) -> EnvatoClient {
    EnvatoClient::new(&EnvatoConfig {
        api_token: token.to_string(),
        base_url: format!("{}/", base_url),
        timeout,
    })
    .unwrap()
}

fn unscoped(code: &str) -> SourceQuery<'_> {
    SourceQuery { code, product: None }
}

fn product(item_id: Option<&str>) -> Product {
    Product {
        id: "prod-1".to_string(),
        name: "Sample Theme".to_string(),
        slug: "sample-theme".to_string(),
        marketplace_item_id: item_id.map(String::from),
        created_at: 0,
    }
}

#[tokio::test]
async fn test_valid_sale_returns_buyer_info() {
    let base = spawn_fake_marketplace().await;
    let client = client(&base, API_TOKEN, Duration::from_secs(5));
    let product = product(Some("12345"));

    let verdict = client
        .check(SourceQuery {
            code: "valid-code",
            product: Some(&product),
        })
        .await
        .unwrap();

    assert!(verdict.is_valid);
    assert_eq!(verdict.message, "Purchase code is valid");
    assert_eq!(verdict.product_id.as_deref(), Some("prod-1"));
    let info = verdict.buyer.unwrap();
    assert_eq!(info, buyer("12345"));
    assert_eq!(verdict.response_data.unwrap()["item_name"], "Sample Theme");
}

#[tokio::test]
async fn test_unknown_code_is_invalid() {
    let base = spawn_fake_marketplace().await;
    let client = client(&base, API_TOKEN, Duration::from_secs(5));

    let verdict = client
        .check(SourceQuery {
            code: "does-not-exist",
            product: None,
        })
        .await
        .unwrap();

    assert!(!verdict.is_valid);
    assert_eq!(verdict.message, "Invalid purchase code");
    assert!(verdict.buyer.is_none());
}

#[tokio::test]
async fn test_sale_for_other_item_is_invalid() {
    let base = spawn_fake_marketplace().await;
    let client = client(&base, API_TOKEN, Duration::from_secs(5));
    let product = product(Some("99999"));

    let verdict = client
        .check(SourceQuery {
            code: "valid-code",
            product: Some(&product),
        })
        .await
        .unwrap();

    assert!(!verdict.is_valid);
    assert_eq!(verdict.message, "Purchase code does not belong to this product");
}

#[tokio::test]
async fn test_upstream_failures_are_source_errors() {
    let base = spawn_fake_marketplace().await;
    let client = client(&base, API_TOKEN, Duration::from_secs(5));

    assert!(matches!(
        client.check(unscoped("server-error")).await,
        Err(SourceError::Transport(_))
    ));
    assert!(matches!(
        client.check(unscoped("garbled")).await,
        Err(SourceError::Malformed(_))
    ));
    assert!(matches!(
        client.check(unscoped("no-item")).await,
        Err(SourceError::Malformed(_))
    ));
}

#[tokio::test]
async fn test_wrong_token_is_transport_error() {
    let base = spawn_fake_marketplace().await;
    let client = client(&base, "wrong-token", Duration::from_secs(5));

    let result = client
        .check(SourceQuery {
            code: "valid-code",
            product: None,
        })
        .await;

    assert!(matches!(result, Err(SourceError::Transport(_))));
}

#[tokio::test]
async fn test_slow_marketplace_times_out() {
    let base = spawn_fake_marketplace().await;
    let client = client(&base, API_TOKEN, Duration::from_millis(100));

    let result = client
        .check(SourceQuery {
            code: "slow",
            product: None,
        })
        .await;

    assert!(matches!(result, Err(SourceError::Timeout)));
}

#[tokio::test]
async fn test_verifier_logs_marketplace_answers() {
    let base = spawn_fake_marketplace().await;
    let marketplace = client(&base, API_TOKEN, Duration::from_secs(5));
    let ctx = create_test_app_state_with_config(marketplace_config(), move |v| {
        v.with_marketplace(Arc::new(marketplace))
    });

    let valid = ctx
        .state
        .verifier
        .verify("valid-code", "shop.example.com", Some("203.0.113.9"))
        .await
        .unwrap();
    assert_eq!(valid.status, VerificationStatus::Success);
    assert_eq!(valid.verification_source, VerificationSource::MarketplaceApi);
    assert_eq!(valid.response_data.unwrap()["buyer"], "marketbuyer");

    let failed = ctx
        .state
        .verifier
        .verify("bogus", "shop.example.com", Some("203.0.113.9"))
        .await
        .unwrap();
    assert_eq!(failed.status, VerificationStatus::Failed);

    let errored = ctx
        .state
        .verifier
        .verify("server-error", "shop.example.com", Some("203.0.113.9"))
        .await
        .unwrap();
    assert_eq!(errored.status, VerificationStatus::Error);

    assert_eq!(count_verification_logs(&ctx.conn()), 3);
}
