//! HTTP surface (§6 "External interfaces — payment service"). Each handler module
//! groups the endpoints spec.md lists together; `configure` wires them onto an
//! `actix_web::web::ServiceConfig` the way the teacher's `rpc::server` mounts its
//! JSON-RPC methods, but as plain REST routes.

pub mod account;
pub mod name_system;
pub mod pricing;
pub mod topup;
pub mod x402;

use actix_web::web;

use crate::deps::Deps;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/x402")
            .route("/price/{scheme}/{address}", web::get().to(x402::price))
            .route("/payment/{scheme}/{address}", web::post().to(x402::payment))
            .route("/finalize", web::post().to(x402::finalize)),
    )
    .service(
        web::scope("/account")
            .route("/balance/{scheme}", web::post().to(topup::crypto_balance))
            .route("/approvals/create", web::post().to(account::create_approval))
            .route("/approvals/list", web::get().to(account::list_approvals))
            .route("/approvals/revoke", web::post().to(account::revoke_approval)),
    )
    .route("/top-up/checkout-session/{address}/{currency}/{amount}", web::get().to(topup::checkout_session))
    .route("/top-up/payment-intent/{address}/{currency}/{amount}", web::get().to(topup::payment_intent))
    .route("/stripe-webhook", web::post().to(topup::stripe_webhook))
    .route("/balance", web::get().to(account::balance))
    .route("/reserve-balance/{scheme}/{address}", web::get().to(account::reserve_balance))
    .route("/refund-balance/{scheme}/{address}", web::get().to(account::refund_balance))
    .route("/check-balance/{scheme}/{address}", web::get().to(account::check_balance))
    .route("/finalize-balance/{scheme}/{address}", web::get().to(account::finalize_reservation))
    .service(
        web::scope("/arns")
            .route("/price/{intent}/{name}", web::get().to(name_system::price))
            .route("/purchase/{intent}/{name}", web::post().to(name_system::purchase))
            .route("/purchase/{nonce}", web::get().to(name_system::purchase_status)),
    )
    .route("/price/{bytes}", web::get().to(pricing::price_for_bytes))
    .route("/rates", web::get().to(pricing::rates))
    .route("/currencies", web::get().to(pricing::currencies))
    .route("/countries", web::get().to(pricing::countries))
    .route("/metrics", web::get().to(pricing::metrics));
}

pub fn correlation_id_header(req: &actix_web::HttpRequest) -> String {
    req.headers()
        .get("X-Correlation-Id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Checks `X-Gateway-Shared-Secret` against the configured secret; the `/reserve-balance`,
/// `/refund-balance`, and `/check-balance` endpoints are inter-service only (§6).
pub fn require_shared_secret(req: &actix_web::HttpRequest, deps: &Deps) -> Result<(), gateway_common::GatewayError> {
    let header = req
        .headers()
        .get(gateway_common::secret::SHARED_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if deps.shared_secret.matches_header(header) {
        Ok(())
    } else {
        Err(gateway_common::GatewayError::Unauthorized("missing or invalid shared secret".into()))
    }
}
