//! Access decisions for gated knowledge-base content.
//!
//! A resource's flags are folded into a single [`ContentGateRequirement`]
//! up front. [`decide`] then walks a fixed precedence: public content, login,
//! product ownership, serial proof, purchase-code proof. Every combination of
//! inputs produces a decision.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use strum::AsRefStr;

use crate::db::queries;
use crate::error::Result;
use crate::models::{KbArticle, KbCategory, VerificationLog};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ResourceKind {
    Article,
    Category,
}

/// Effective requirement flags of a KB resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceRequirements {
    pub requires_serial: bool,
    pub requires_purchase_code: bool,
    pub product_id: Option<String>,
}

impl ResourceRequirements {
    pub fn for_category(category: &KbCategory) -> Self {
        Self {
            requires_serial: category.requires_serial,
            requires_purchase_code: category.requires_purchase_code,
            product_id: category.product_id.clone(),
        }
    }

    /// Articles inherit their category's flags; the article's own product
    /// wins over the category's.
    pub fn for_article(article: &KbArticle, category: &KbCategory) -> Self {
        Self {
            requires_serial: article.requires_serial || category.requires_serial,
            requires_purchase_code: article.requires_purchase_code
                || category.requires_purchase_code,
            product_id: article
                .product_id
                .clone()
                .or_else(|| category.product_id.clone()),
        }
    }

    pub fn requirement(&self) -> ContentGateRequirement {
        if self.requires_serial {
            ContentGateRequirement::RequiresSerial
        } else if self.requires_purchase_code {
            ContentGateRequirement::RequiresPurchaseCode
        } else if self.product_id.is_some() {
            ContentGateRequirement::RequiresLogin
        } else {
            ContentGateRequirement::Public
        }
    }
}

/// What a resource asks of the caller, so the presentation layer can pick
/// which prompt to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentGateRequirement {
    Public,
    RequiresLogin,
    RequiresSerial,
    RequiresPurchaseCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Anonymous,
    User { user_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AccessReason {
    Public,
    LoginRequired,
    HasLicense,
    NoLicense,
    SerialVerified,
    SerialRequired,
    PurchaseCodeVerified,
    PurchaseCodeRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub granted: bool,
    pub reason: AccessReason,
    pub requirement: ContentGateRequirement,
}

impl AccessDecision {
    fn new(granted: bool, reason: AccessReason, requirement: ContentGateRequirement) -> Self {
        Self {
            granted,
            reason,
            requirement,
        }
    }

    /// Granted because a submitted code was verified, not through ownership.
    pub fn granted_by_proof(&self) -> bool {
        self.granted
            && matches!(
                self.reason,
                AccessReason::SerialVerified | AccessReason::PurchaseCodeVerified
            )
    }
}

/// Pure decision function. `owns_license` is whether the actor owns an
/// active license for the resource's product; it is ignored for anonymous
/// actors and for resources without a product.
pub fn decide(
    resource: &ResourceRequirements,
    actor: &Actor,
    owns_license: bool,
    proof: Option<&VerificationLog>,
) -> AccessDecision {
    let requirement = resource.requirement();

    if requirement == ContentGateRequirement::Public {
        return AccessDecision::new(true, AccessReason::Public, requirement);
    }

    if *actor == Actor::Anonymous {
        return AccessDecision::new(false, AccessReason::LoginRequired, requirement);
    }

    if resource.product_id.is_some() {
        if owns_license {
            return AccessDecision::new(true, AccessReason::HasLicense, requirement);
        }
        if !resource.requires_serial && !resource.requires_purchase_code {
            return AccessDecision::new(false, AccessReason::NoLicense, requirement);
        }
    }

    let proven = proof.map(|p| p.is_valid).unwrap_or(false);

    if resource.requires_serial {
        let reason = if proven {
            AccessReason::SerialVerified
        } else {
            AccessReason::SerialRequired
        };
        return AccessDecision::new(proven, reason, requirement);
    }

    let reason = if proven {
        AccessReason::PurchaseCodeVerified
    } else {
        AccessReason::PurchaseCodeRequired
    };
    AccessDecision::new(proven, reason, requirement)
}

/// Evaluate access, looking up license ownership only when it can matter.
pub fn can_access(
    conn: &Connection,
    resource: &ResourceRequirements,
    actor: &Actor,
    proof: Option<&VerificationLog>,
) -> Result<AccessDecision> {
    let owns_license = match (actor, &resource.product_id) {
        (Actor::User { user_id }, Some(product_id)) => queries::user_has_active_license(
            conn,
            user_id,
            product_id,
            chrono::Utc::now().timestamp(),
        )?,
        _ => false,
    };
    Ok(decide(resource, actor, owns_license, proof))
}
