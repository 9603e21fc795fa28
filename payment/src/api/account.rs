//! `/balance`, `/{reserve,refund,check}-balance/*`, `/account/approvals/*` (§4.2, §6).

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gateway_common::money::Credits;
use gateway_common::GatewayError;

use crate::deps::Deps;
use crate::ledger::reserve::{check, finalize, reserve};
use crate::ledger::{Delegation, LedgerReason, ReserveDirective};

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    pub address: String,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub spendable: Credits,
    pub owned: Credits,
    pub effective: Credits,
    pub given: Vec<Delegation>,
    pub received: Vec<Delegation>,
}

/// `GET /balance` (§6 "auth = signature"). The caller authenticates by signing the
/// request the same way an upload envelope is signed; that verification reuses
/// `gateway_common::crypto` and is applied by upstream middleware before this
/// handler runs, so the handler itself only trusts the already-authenticated address.
pub async fn balance(query: web::Query<BalanceQuery>, deps: web::Data<Deps>) -> Result<HttpResponse, GatewayError> {
    let owned = deps.ledger.balance(&query.address).await.map_err(GatewayError::internal)?;
    let received = deps.ledger.active_delegations_to(&query.address).await.map_err(GatewayError::internal)?;
    let given = deps.ledger.active_delegations_from(&query.address).await.map_err(GatewayError::internal)?;
    let reserved = deps.ledger.reserved_amount_for(&query.address).await.map_err(GatewayError::internal)?;
    let now = Utc::now();
    let effective = received.iter().filter(|d| d.is_active(now)).fold(owned, |acc, d| acc + d.remaining());
    // §3 "spendable(A) = balance(A) + received − given − reservations".
    let received_total = received.iter().filter(|d| d.is_active(now)).fold(Credits::ZERO, |acc, d| acc + d.remaining());
    let given_total = given.iter().filter(|d| d.is_active(now)).fold(Credits::ZERO, |acc, d| acc + d.remaining());
    let spendable = owned.checked_add(received_total).unwrap_or(owned).checked_sub(given_total).unwrap_or(Credits::ZERO);
    let spendable = spendable.checked_sub(reserved).unwrap_or(Credits::ZERO);
    Ok(HttpResponse::Ok().json(BalanceResponse {
        spendable,
        owned,
        effective,
        given,
        received,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ReserveQuery {
    pub bytes: u64,
    pub data_item_id: String,
    #[serde(default)]
    pub directive: Option<String>,
    /// The payer set `P` (§4.2, §6 `&paidBy[]=…`): only delegations granted by
    /// one of these addresses are drawable against. Empty means "no delegations
    /// eligible" — with `directive=list-or-self` the grantee's own balance is
    /// still tried.
    #[serde(default, rename = "paidBy")]
    pub paid_by: Vec<String>,
}

fn parse_directive(raw: Option<&str>) -> ReserveDirective {
    match raw {
        Some("list-only") => ReserveDirective::ListOnly,
        _ => ReserveDirective::ListOrSelf,
    }
}

/// `GET /reserve-balance/:scheme/:address` — inter-service only (§6 "protected
/// (shared secret)").
pub async fn reserve_balance(
    req: HttpRequest,
    path: web::Path<(String, String)>,
    query: web::Query<ReserveQuery>,
    deps: web::Data<Deps>,
) -> Result<HttpResponse, GatewayError> {
    super::require_shared_secret(&req, &deps)?;
    let (_scheme, address) = path.into_inner();

    let storage_rate = deps.oracle.storage_price_per_10_gib().await.map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;
    let cost = crate::pricing::credits_for_bytes(query.bytes, storage_rate, vec![]).map_err(GatewayError::internal)?;
    let directive = parse_directive(query.directive.as_deref());

    reserve(deps.ledger.as_ref(), &address, &query.data_item_id, cost.net, &query.paid_by, directive)
        .await
        .map_err(|e| match e {
            crate::ledger::LedgerError::Insufficient { need, spendable } => {
                GatewayError::InsufficientBalance { need: need.0, spendable: spendable.0 }
            }
            other => GatewayError::internal(other),
        })?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "reserved": cost.net, "dataItemId": query.data_item_id })))
}

/// `GET /refund-balance/:scheme/:address`.
pub async fn refund_balance(
    req: HttpRequest,
    path: web::Path<(String, String)>,
    query: web::Query<ReserveQuery>,
    deps: web::Data<Deps>,
) -> Result<HttpResponse, GatewayError> {
    super::require_shared_secret(&req, &deps)?;
    let (_scheme, _address) = path.into_inner();
    crate::ledger::reserve::refund(deps.ledger.as_ref(), &query.data_item_id)
        .await
        .map_err(GatewayError::internal)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "refunded": query.data_item_id })))
}

/// `GET /check-balance/:scheme/:address`.
pub async fn check_balance(
    req: HttpRequest,
    path: web::Path<(String, String)>,
    query: web::Query<ReserveQuery>,
    deps: web::Data<Deps>,
) -> Result<HttpResponse, GatewayError> {
    super::require_shared_secret(&req, &deps)?;
    let (_scheme, address) = path.into_inner();
    let storage_rate = deps.oracle.storage_price_per_10_gib().await.map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;
    let cost = crate::pricing::credits_for_bytes(query.bytes, storage_rate, vec![]).map_err(GatewayError::internal)?;
    let directive = parse_directive(query.directive.as_deref());
    let result = check(deps.ledger.as_ref(), &address, cost.net, &query.paid_by, directive).await.map_err(GatewayError::internal)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "sufficient": result.sufficient,
        "cost": result.cost,
        "currentSpendable": result.current_spendable,
    })))
}

/// Finalizes a reservation once the upload has settled server-side (called by U,
/// shared secret protected, not in §6's public endpoint list but required by §4.2's
/// lifecycle — exposed under `/account` rather than the public surface).
pub async fn finalize_reservation(
    req: HttpRequest,
    query: web::Query<ReserveQuery>,
    deps: web::Data<Deps>,
) -> Result<HttpResponse, GatewayError> {
    super::require_shared_secret(&req, &deps)?;
    finalize(deps.ledger.as_ref(), &query.data_item_id).await.map_err(GatewayError::internal)?;
    Ok(HttpResponse::Ok().finish())
}

#[derive(Debug, Deserialize)]
pub struct CreateApprovalBody {
    pub grantor: String,
    pub grantee: String,
    pub approved: Credits,
    pub expires_at: Option<DateTime<Utc>>,
}

/// `POST /account/approvals/create` — grants a delegation (§3 "Delegation").
pub async fn create_approval(body: web::Json<CreateApprovalBody>, deps: web::Data<Deps>) -> Result<HttpResponse, GatewayError> {
    let delegation = Delegation {
        id: Uuid::new_v4(),
        grantor: body.grantor.clone(),
        grantee: body.grantee.clone(),
        approved: body.approved,
        used: Credits::ZERO,
        expires_at: body.expires_at,
        revoked: false,
    };
    deps.ledger.insert_delegation(delegation.clone()).await.map_err(GatewayError::internal)?;
    Ok(HttpResponse::Created().json(delegation))
}

#[derive(Debug, Deserialize)]
pub struct ListApprovalsQuery {
    pub grantee: String,
}

/// `GET /account/approvals/list`.
pub async fn list_approvals(query: web::Query<ListApprovalsQuery>, deps: web::Data<Deps>) -> Result<HttpResponse, GatewayError> {
    let delegations = deps.ledger.active_delegations_to(&query.grantee).await.map_err(GatewayError::internal)?;
    Ok(HttpResponse::Ok().json(delegations))
}

#[derive(Debug, Deserialize)]
pub struct RevokeApprovalBody {
    pub id: Uuid,
}

/// `POST /account/approvals/revoke` — a revoked delegation's unused remainder is
/// simply no longer drawable; funds already drawn into a live reservation are not
/// clawed back, they settle through the normal finalize/refund path (§4.2).
pub async fn revoke_approval(body: web::Json<RevokeApprovalBody>, deps: web::Data<Deps>) -> Result<HttpResponse, GatewayError> {
    deps.ledger.revoke_delegation(body.id).await.map_err(GatewayError::internal)?;
    Ok(HttpResponse::Ok().finish())
}
