//! `/arns/price/:intent/:name`, `/arns/purchase/*` (§4.10, §6).

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use gateway_common::GatewayError;

use crate::deps::Deps;
use crate::name_system::{purchase as run_purchase, quote as run_quote};

#[derive(Debug, Deserialize)]
pub struct NamePricePath {
    pub intent: String,
    pub name: String,
}

/// `GET /arns/price/:intent/:name`.
pub async fn price(path: web::Path<NamePricePath>, deps: web::Data<Deps>) -> Result<HttpResponse, GatewayError> {
    let native_token_usd =
        deps.oracle.native_token_price_usd().await.map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;
    let (cost_atomic, cost_credits) = run_quote(deps.name_registry.as_ref(), &path.intent, &path.name, |atomic| {
        gateway_common::money::Credits(atomic.saturating_mul(native_token_usd.0))
    })
    .await
    .map_err(GatewayError::internal)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "intent": path.intent,
        "name": path.name,
        "costNativeAtomic": cost_atomic,
        "costCredits": cost_credits,
    })))
}

#[derive(Debug, Deserialize)]
pub struct NamePurchaseBody {
    pub grantee: String,
}

/// `POST /arns/purchase/:intent/:name` (§4.10). Quotes fresh at purchase time
/// rather than trusting a client-supplied quote, since the registry's price can
/// move between the `price` call and the purchase.
pub async fn purchase(
    path: web::Path<NamePricePath>,
    body: web::Json<NamePurchaseBody>,
    deps: web::Data<Deps>,
) -> Result<HttpResponse, GatewayError> {
    let native_token_usd =
        deps.oracle.native_token_price_usd().await.map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;
    let (cost_atomic, cost_credits) = run_quote(deps.name_registry.as_ref(), &path.intent, &path.name, |atomic| {
        gateway_common::money::Credits(atomic.saturating_mul(native_token_usd.0))
    })
    .await
    .map_err(GatewayError::internal)?;

    let record = run_purchase(
        deps.ledger.as_ref(),
        deps.name_registry.as_ref(),
        deps.name_system_store.as_ref(),
        &path.intent,
        &path.name,
        &body.grantee,
        cost_atomic,
        cost_credits,
    )
    .await
    .map_err(|e| match e {
        crate::name_system::NameSystemError::Ledger(crate::ledger::LedgerError::Insufficient { need, spendable }) => {
            GatewayError::InsufficientBalance { need: need.0, spendable: spendable.0 }
        }
        other => GatewayError::internal(other),
    })?;
    Ok(HttpResponse::Accepted().json(record))
}

/// `GET /arns/purchase/:nonce`.
pub async fn purchase_status(path: web::Path<Uuid>, deps: web::Data<Deps>) -> Result<HttpResponse, GatewayError> {
    let nonce = path.into_inner();
    let record = deps
        .name_system_store
        .get(nonce)
        .await
        .map_err(GatewayError::internal)?
        .ok_or_else(|| GatewayError::NotFound(format!("purchase {nonce} not found")))?;
    Ok(HttpResponse::Ok().json(record))
}
