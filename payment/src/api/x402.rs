//! `/x402/*` — the gasless-stablecoin payment protocol (§4.3, §6).

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use gateway_common::GatewayError;

use crate::deps::Deps;
use crate::gasless::{self, GaslessMode};
use crate::pricing::{credits_for_bytes, stablecoin_for_credits};

#[derive(Debug, Deserialize)]
pub struct PriceQuery {
    pub bytes: u64,
}

/// `GET /x402/price/:scheme/:address?bytes=N`. `scheme` names the chain/network,
/// `address` the payee credited once settlement completes. Browser clients asking
/// for HTML get a minimal paywall page instead of the JSON requirements object.
pub async fn price(
    req: HttpRequest,
    path: web::Path<(String, String)>,
    query: web::Query<PriceQuery>,
    deps: web::Data<Deps>,
) -> Result<HttpResponse, GatewayError> {
    let (scheme, address) = path.into_inner();
    let chain = deps
        .chain_by_network(&scheme)
        .ok_or_else(|| GatewayError::NotFound(format!("unsupported network {scheme:?}")))?;

    let storage_rate = deps.oracle.storage_price_per_10_gib().await.map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;
    let stablecoin_rate = deps.oracle.stablecoin_price_usd().await.map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;

    let quote = credits_for_bytes(query.bytes, storage_rate, vec![]).map_err(GatewayError::internal)?;
    let amount = stablecoin_for_credits(quote.net, stablecoin_rate).map_err(GatewayError::internal)?;

    let requirements = crate::gasless::PaymentRequirements::for_chains(
        std::slice::from_ref(chain),
        &address,
        amount,
        300,
    );

    let wants_html = req
        .headers()
        .get("Accept")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/html"));

    if wants_html {
        let body = format!(
            "<html><body><h1>Payment required</h1><p>{} atomic units of {} on {}</p></body></html>",
            amount, chain.eip712_name, chain.network
        );
        Ok(HttpResponse::PaymentRequired().content_type("text/html").body(body))
    } else {
        Ok(HttpResponse::PaymentRequired().json(requirements))
    }
}

#[derive(Debug, Deserialize)]
pub struct PaymentQuery {
    pub bytes: u64,
    #[serde(default)]
    pub item_id: Option<String>,
    /// Overrides the per-endpoint gasless-mode default (DESIGN.md Open Question #2).
    /// The upload service sets this explicitly for `POST /tx/raw` (`exact-only`);
    /// `POST /tx` omits it and gets `deps.gasless_mode_one_shot`.
    #[serde(default)]
    pub mode: Option<String>,
    /// Fallback carrier for the `X-PAYMENT` value when the caller is the upload
    /// service: `gateway_common::http_client::InterServiceClient` only sets the
    /// shared-secret header on inter-service calls, so `upload::gasless_client`
    /// relays the client's header value as this query parameter instead.
    #[serde(default)]
    pub x_payment: Option<String>,
}

/// `POST /x402/payment/:scheme/:address` — verify + settle (§4.3).
pub async fn payment(
    req: HttpRequest,
    path: web::Path<(String, String)>,
    query: web::Query<PaymentQuery>,
    deps: web::Data<Deps>,
) -> Result<HttpResponse, GatewayError> {
    let (scheme, address) = path.into_inner();
    let chain = deps
        .chain_by_network(&scheme)
        .ok_or_else(|| GatewayError::NotFound(format!("unsupported network {scheme:?}")))?;

    let header_value = req
        .headers()
        .get("X-PAYMENT")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| query.x_payment.clone())
        .ok_or(GatewayError::PaymentRequired)?;
    let header = gasless::decode_payment_header(&header_value)
        .map_err(|e| GatewayError::PaymentVerificationFailed(e.to_string()))?;

    let storage_rate = deps.oracle.storage_price_per_10_gib().await.map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;
    let stablecoin_rate = deps.oracle.stablecoin_price_usd().await.map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;
    let cost = credits_for_bytes(query.bytes, storage_rate, vec![]).map_err(GatewayError::internal)?;
    let required_amount = stablecoin_for_credits(cost.net, stablecoin_rate).map_err(GatewayError::internal)?;

    let item_id = query.item_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
    let mode: GaslessMode = match query.mode.as_deref() {
        Some(raw) => raw.parse().map_err(|_| GatewayError::ClientMalformed(format!("unknown gasless mode {raw:?}")))?,
        None => deps.gasless_mode_one_shot,
    };

    let record = gasless::verify_and_settle(
        deps.ledger.as_ref(),
        deps.gasless_store.as_ref(),
        deps.facilitator.as_ref(),
        chain,
        &header.network,
        &header.authorization,
        &header.asset,
        &address,
        required_amount.0,
        stablecoin_rate,
        mode,
        &item_id,
        query.bytes,
        cost.net,
    )
    .await
    .map_err(|e| GatewayError::PaymentVerificationFailed(e.to_string()))?;

    let response_header = gasless::encode_payment_response(&record);
    Ok(HttpResponse::Ok().insert_header(("X-Payment-Response", response_header)).json(record))
}

#[derive(Debug, Deserialize)]
pub struct FinalizeBody {
    pub data_item_id: String,
    pub actual_byte_count: u64,
}

/// `POST /x402/finalize` — post-upload fraud finalization (§4.3).
pub async fn finalize(body: web::Json<FinalizeBody>, deps: web::Data<Deps>) -> Result<HttpResponse, GatewayError> {
    let record = gasless::finalize(deps.ledger.as_ref(), deps.gasless_store.as_ref(), &body.data_item_id, body.actual_byte_count)
        .await
        .map_err(|e| GatewayError::PaymentVerificationFailed(e.to_string()))?;
    Ok(HttpResponse::Ok().json(record))
}
