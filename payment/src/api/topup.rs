//! `/account/balance/:scheme`, `/top-up/*`, `/stripe-webhook` (§4.1, §6).

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Duration;
use serde::Deserialize;

use gateway_common::GatewayError;

use crate::crypto_topup::submit_deposit;
use crate::deps::Deps;
use crate::fiat::{create_quote, handle_webhook_event, verify_webhook};

/// A fiat top-up quote stays open long enough to cover a checkout session, not
/// the payment flow itself — mirrors a typical processor checkout-session expiry.
const FIAT_QUOTE_VALIDITY_MINUTES: i64 = 30;

#[derive(Debug, Deserialize)]
pub struct CryptoBalanceBody {
    pub address: String,
    pub tx_id: String,
}

/// `POST /account/balance/:scheme` — submit a chain tx id for crypto top-up
/// (§6 "returns 200 confirmed, 202 pending, 400 invalid"). The depositing
/// address is carried in the body alongside the tx id, not the path.
pub async fn crypto_balance(
    scheme: web::Path<String>,
    body: web::Json<CryptoBalanceBody>,
    deps: web::Data<Deps>,
) -> Result<HttpResponse, GatewayError> {
    let scheme = scheme.into_inner();
    let credits_per_native_unit =
        deps.oracle.native_token_price_usd().await.map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;

    let deposit = submit_deposit(
        deps.ledger.as_ref(),
        deps.crypto_deposit_store.as_ref(),
        deps.chain_tx_verifier.as_ref(),
        &scheme,
        &body.address,
        &body.tx_id,
        credits_per_native_unit,
    )
    .await
    .map_err(GatewayError::internal)?;

    match deposit.status {
        crate::crypto_topup::DepositStatus::Confirmed => Ok(HttpResponse::Ok().json(deposit)),
        crate::crypto_topup::DepositStatus::Pending => Ok(HttpResponse::Accepted().json(deposit)),
        crate::crypto_topup::DepositStatus::Rejected => {
            Err(GatewayError::ClientMalformed(format!("transaction {} rejected", body.tx_id)))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TopUpPath {
    pub address: String,
    pub currency: String,
    pub amount: u64,
}

#[derive(Debug, Deserialize)]
pub struct TopUpQuery {
    #[serde(default, rename = "promoCode")]
    pub promo_codes: Vec<String>,
}

/// `GET /top-up/checkout-session/:address/:currency/:amount`.
pub async fn checkout_session(
    path: web::Path<TopUpPath>,
    query: web::Query<TopUpQuery>,
    deps: web::Data<Deps>,
) -> Result<HttpResponse, GatewayError> {
    open_quote(&path, &query, &deps).await
}

/// `GET /top-up/payment-intent/:address/:currency/:amount`. Distinct route from
/// `checkout_session` per §6, but both just open a fiat quote the webhook later
/// consumes; processor-specific session bookkeeping lives behind `fiat::create_quote`.
pub async fn payment_intent(
    path: web::Path<TopUpPath>,
    query: web::Query<TopUpQuery>,
    deps: web::Data<Deps>,
) -> Result<HttpResponse, GatewayError> {
    open_quote(&path, &query, &deps).await
}

async fn open_quote(path: &TopUpPath, query: &TopUpQuery, deps: &Deps) -> Result<HttpResponse, GatewayError> {
    // Currency-to-USD conversion for non-USD `path.currency` is out of scope (§1);
    // `path.amount` is treated as already USD-denominated minor units.
    let usd_rate = deps.oracle.native_token_price_usd().await.map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;
    let quote = crate::pricing::credits_for_fiat(
        gateway_common::money::Credits(path.amount as u128),
        usd_rate,
        vec![],
    )
    .map_err(GatewayError::internal)?;

    let record = create_quote(
        &path.address,
        path.amount,
        &path.currency,
        quote.net,
        query.promo_codes.clone(),
        Duration::minutes(FIAT_QUOTE_VALIDITY_MINUTES),
    );
    deps.fiat_quote_store.insert(record.clone()).await.map_err(GatewayError::internal)?;
    Ok(HttpResponse::Ok().json(record))
}

#[derive(Debug, Deserialize)]
pub struct StripeWebhookBody {
    pub quote_id: uuid::Uuid,
    pub timestamp: i64,
}

/// `POST /stripe-webhook`. The signature covers the raw body, so it is read and
/// verified before the JSON is parsed, the way the teacher's callback handler
/// checks the signature ahead of deserializing the payload.
pub async fn stripe_webhook(
    req: HttpRequest,
    raw_body: web::Bytes,
    deps: web::Data<Deps>,
) -> Result<HttpResponse, GatewayError> {
    let signature = req
        .headers()
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| GatewayError::Unauthorized("missing Stripe-Signature header".into()))?;

    let body_str = std::str::from_utf8(&raw_body)
        .map_err(|_| GatewayError::ClientMalformed("webhook body is not valid UTF-8".into()))?;

    let parsed: StripeWebhookBody =
        serde_json::from_str(body_str).map_err(|e| GatewayError::ClientMalformed(e.to_string()))?;

    let webhook_secret = deps
        .fiat_webhook_secret
        .as_ref()
        .ok_or_else(|| GatewayError::internal(anyhow::anyhow!("fiat webhook secret not configured")))?;

    if !verify_webhook(webhook_secret.as_bytes(), parsed.timestamp, body_str, signature) {
        return Err(GatewayError::Unauthorized("invalid webhook signature".into()));
    }

    handle_webhook_event(deps.ledger.as_ref(), deps.fiat_quote_store.as_ref(), parsed.quote_id)
        .await
        .map_err(GatewayError::internal)?;
    Ok(HttpResponse::Ok().finish())
}
