use axum::{
    Extension, Router,
    extract::State,
    http::HeaderMap,
    middleware,
    routing::{get, post},
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path, Query};
use crate::gate::{self, AccessDecision, AccessReason, Actor, ResourceKind, ResourceRequirements};
use crate::middleware::actor_auth;
use crate::models::{
    KbArticle, KbCategory, Product, VerificationLog, VerificationSource, VerificationStatus,
};
use crate::registry;
use crate::util::extract_request_info;
use crate::verification::VerificationRequest;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/kb/articles/{id}", get(get_article))
        .route("/kb/categories/{id}", get(get_category))
        .layer(middleware::from_fn_with_state(state, actor_auth))
}

/// Routes that run submitted purchase codes through the verifier. Kept
/// apart so the server can rate limit them with the public routes.
pub fn access_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/kb/articles/{id}/access", post(submit_article_access))
        .route("/kb/categories/{id}/access", post(submit_category_access))
        .layer(middleware::from_fn_with_state(state, actor_auth))
}

#[derive(Debug, Deserialize)]
pub struct AccessTokenQuery {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AccessRequest {
    pub code: String,
    pub domain: String,
}

/// The verification attempt made for an access request.
#[derive(Debug, Serialize)]
pub struct VerificationSummary {
    pub log_id: i64,
    pub valid: bool,
    pub status: VerificationStatus,
    pub message: String,
    pub masked_purchase_code: String,
}

impl From<&VerificationLog> for VerificationSummary {
    fn from(log: &VerificationLog) -> Self {
        Self {
            log_id: log.id,
            valid: log.is_valid,
            status: log.status,
            message: log.response_message.clone(),
            masked_purchase_code: log.masked_purchase_code.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct KbAccessResponse {
    #[serde(flatten)]
    pub decision: AccessDecision,
    /// Only present when access is granted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article: Option<KbArticle>,
    /// Only present when access is granted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<KbCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationSummary>,
    /// Issued when access was granted by a verified code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl KbAccessResponse {
    fn new(decision: AccessDecision) -> Self {
        Self {
            decision,
            article: None,
            category: None,
            verification: None,
            access_token: None,
        }
    }
}

/// A gated resource with everything needed to decide on it.
struct GatedResource {
    kind: ResourceKind,
    id: String,
    requirements: ResourceRequirements,
    /// Category pin, if any
    source: Option<VerificationSource>,
}

fn load_article(conn: &Connection, id: &str) -> Result<(KbArticle, KbCategory)> {
    let article = queries::get_kb_article(conn, id)?
        .ok_or_else(|| AppError::NotFound("Article not found".into()))?;
    let category = queries::get_kb_category(conn, &article.category_id)?
        .ok_or_else(|| AppError::Internal("Article category missing".into()))?;
    Ok((article, category))
}

fn load_category(conn: &Connection, id: &str) -> Result<KbCategory> {
    queries::get_kb_category(conn, id)?
        .ok_or_else(|| AppError::NotFound("Category not found".into()))
}

/// Reconstruct a proof from a previously issued access token.
fn proof_from_token(
    state: &AppState,
    conn: &Connection,
    token: Option<&str>,
    resource: &GatedResource,
) -> Result<Option<VerificationLog>> {
    let Some(log_id) = token.and_then(|t| state.access_tokens.verify(t, resource.kind, &resource.id))
    else {
        return Ok(None);
    };
    Ok(queries::get_verification_log(conn, log_id)?.filter(|log| log.is_valid))
}

/// Verify a submitted code for a resource and decide with the fresh proof.
///
/// When the decision cannot be changed by a proof (already granted, login
/// needed, or a product-only resource) no verification is attempted.
async fn submit_proof(
    state: &AppState,
    actor: &Actor,
    headers: &HeaderMap,
    resource: &GatedResource,
    req: &AccessRequest,
) -> Result<KbAccessResponse> {
    let (decision, product) = {
        let conn = state.db.get()?;
        let decision = gate::can_access(&conn, &resource.requirements, actor, None)?;
        let product: Option<Product> = match &resource.requirements.product_id {
            Some(product_id) => queries::get_product_by_id(&conn, product_id)?,
            None => None,
        };
        (decision, product)
    };

    let proof_can_help = matches!(
        decision.reason,
        AccessReason::SerialRequired | AccessReason::PurchaseCodeRequired
    );
    if !proof_can_help {
        return Ok(KbAccessResponse::new(decision));
    }

    let (ip_address, user_agent) = extract_request_info(headers);
    let outcome = state
        .verifier
        .verify_request(VerificationRequest {
            raw_code: &req.code,
            domain: &req.domain,
            ip_address: ip_address.as_deref(),
            user_agent: user_agent.as_deref(),
            product: product.as_ref(),
            source: resource.source,
        })
        .await?;

    let mut conn = state.db.get()?;

    if let (Actor::User { user_id }, Some(verdict), Some(product)) =
        (actor, outcome.verdict.as_ref(), product.as_ref())
    {
        if let (true, Some(buyer)) = (verdict.is_valid, verdict.buyer.as_ref()) {
            registry::import_marketplace_license(
                &mut conn,
                req.code.trim(),
                &product.id,
                Some(user_id.as_str()),
                buyer,
            )?;
        }
    }

    let decision = gate::can_access(&conn, &resource.requirements, actor, Some(&outcome.log))?;
    let access_token = if decision.granted_by_proof() {
        Some(
            state
                .access_tokens
                .issue(resource.kind, &resource.id, outcome.log.id)?,
        )
    } else {
        None
    };

    tracing::info!(
        kind = resource.kind.as_ref(),
        resource_id = %resource.id,
        granted = decision.granted,
        reason = decision.reason.as_ref(),
        log_id = outcome.log.id,
        "KB access requested with code"
    );

    Ok(KbAccessResponse {
        verification: Some(VerificationSummary::from(&outcome.log)),
        access_token,
        ..KbAccessResponse::new(decision)
    })
}

fn article_resource(article: &KbArticle, category: &KbCategory) -> GatedResource {
    GatedResource {
        kind: ResourceKind::Article,
        id: article.id.clone(),
        requirements: ResourceRequirements::for_article(article, category),
        source: category.verification_source,
    }
}

fn category_resource(category: &KbCategory) -> GatedResource {
    GatedResource {
        kind: ResourceKind::Category,
        id: category.id.clone(),
        requirements: ResourceRequirements::for_category(category),
        source: category.verification_source,
    }
}

/// GET /kb/articles/{id} - Article body if the caller may see it
pub async fn get_article(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Query(query): Query<AccessTokenQuery>,
) -> Result<Json<KbAccessResponse>> {
    let conn = state.db.get()?;
    let (article, category) = load_article(&conn, &id)?;
    let resource = article_resource(&article, &category);
    let proof = proof_from_token(&state, &conn, query.token.as_deref(), &resource)?;
    let decision = gate::can_access(&conn, &resource.requirements, &actor, proof.as_ref())?;

    let mut response = KbAccessResponse::new(decision);
    if decision.granted {
        response.article = Some(article);
    }
    Ok(Json(response))
}

/// POST /kb/articles/{id}/access - Submit a serial/purchase code for an article
pub async fn submit_article_access(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<AccessRequest>,
) -> Result<Json<KbAccessResponse>> {
    let (article, resource) = {
        let conn = state.db.get()?;
        let (article, category) = load_article(&conn, &id)?;
        let resource = article_resource(&article, &category);
        (article, resource)
    };

    let mut response = submit_proof(&state, &actor, &headers, &resource, &req).await?;
    if response.decision.granted {
        response.article = Some(article);
    }
    Ok(Json(response))
}

/// GET /kb/categories/{id} - Category details if the caller may see it
pub async fn get_category(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Query(query): Query<AccessTokenQuery>,
) -> Result<Json<KbAccessResponse>> {
    let conn = state.db.get()?;
    let category = load_category(&conn, &id)?;
    let resource = category_resource(&category);
    let proof = proof_from_token(&state, &conn, query.token.as_deref(), &resource)?;
    let decision = gate::can_access(&conn, &resource.requirements, &actor, proof.as_ref())?;

    let mut response = KbAccessResponse::new(decision);
    if decision.granted {
        response.category = Some(category);
    }
    Ok(Json(response))
}

/// POST /kb/categories/{id}/access - Submit a serial/purchase code for a category
pub async fn submit_category_access(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<AccessRequest>,
) -> Result<Json<KbAccessResponse>> {
    let category = {
        let conn = state.db.get()?;
        load_category(&conn, &id)?
    };
    let resource = category_resource(&category);

    let mut response = submit_proof(&state, &actor, &headers, &resource, &req).await?;
    if response.decision.granted {
        response.category = Some(category);
    }
    Ok(Json(response))
}
