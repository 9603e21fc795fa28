//! `/price/:bytes`, `/rates`, `/currencies`, `/countries`, `/metrics` (§6 "pricing tables").

use actix_web::{web, HttpResponse};

use gateway_common::GatewayError;

use crate::deps::Deps;
use crate::pricing::credits_for_bytes;

/// `GET /price/:bytes` — byte-denominated quote using the current storage rate,
/// distinct from the stablecoin-denominated `/x402/price/*` (§4.1).
pub async fn price_for_bytes(path: web::Path<u64>, deps: web::Data<Deps>) -> Result<HttpResponse, GatewayError> {
    let bytes = path.into_inner();
    let storage_rate = deps.oracle.storage_price_per_10_gib().await.map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;
    let quote = credits_for_bytes(bytes, storage_rate, vec![]).map_err(GatewayError::internal)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "bytes": bytes, "price": quote.net })))
}

/// `GET /rates` — the oracle-sampled conversion rates this instance is currently quoting from.
pub async fn rates(deps: web::Data<Deps>) -> Result<HttpResponse, GatewayError> {
    let native_token_usd =
        deps.oracle.native_token_price_usd().await.map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;
    let storage_per_10_gib =
        deps.oracle.storage_price_per_10_gib().await.map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;
    let stablecoin_usd =
        deps.oracle.stablecoin_price_usd().await.map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "nativeTokenUsd": native_token_usd,
        "storagePer10Gib": storage_per_10_gib,
        "stablecoinUsd": stablecoin_usd,
        "infraFeeBps": deps.infra_fee_bps,
    })))
}

/// `GET /currencies` — fiat currencies the `/top-up/*` flow accepts. Processor
/// integration (§1 "payment processor integrations ... out of scope") decides the
/// real set; this lists the ones the gateway's quote math has been exercised with.
pub async fn currencies() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!(["usd", "eur", "gbp"]))
}

/// `GET /countries` — countries the fiat top-up flow is available in.
pub async fn countries() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!(["US", "GB", "DE", "FR", "CA"]))
}

/// `GET /metrics` — Prometheus exposition format (§2.5), same route pattern as
/// the teacher's `rpc::server::prometheus_metrics`.
pub async fn metrics(deps: web::Data<Deps>) -> HttpResponse {
    match &deps.prometheus_handle {
        Some(handle) => HttpResponse::Ok().content_type("text/plain; version=0.0.4").body(handle.render()),
        None => HttpResponse::NotFound().body("Prometheus metrics are not enabled"),
    }
}
