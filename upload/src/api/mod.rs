//! HTTP surface (§6 "External interfaces — upload service"). One module per
//! endpoint group, wired onto an `actix_web::web::ServiceConfig` the same way
//! `gateway_payment::api::configure` wires the payment service's.

pub mod ingest;
pub mod info;
pub mod item;
pub mod multipart;

use actix_web::web;

use crate::deps::Deps;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/tx", web::post().to(ingest::one_shot))
        .route("/tx/raw", web::post().to(ingest::raw_blob))
        .route("/tx/{id}/offset", web::get().to(item::offset))
        .route("/tx/{id}", web::get().to(item::status))
        .route("/multipart", web::post().to(multipart::create))
        .route("/multipart/{sid}/finalize", web::post().to(multipart::finalize))
        .route("/multipart/{sid}/abort", web::post().to(multipart::abort))
        .route("/multipart/{sid}/status", web::get().to(multipart::status))
        .route("/multipart/{sid}", web::get().to(multipart::status))
        .route("/multipart/{sid}/{offset}", web::put().to(multipart::chunk))
        .route("/info", web::get().to(info::info));
}

pub fn correlation_id_header(req: &actix_web::HttpRequest) -> String {
    req.headers()
        .get("X-Correlation-Id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Checks `X-Gateway-Shared-Secret`, mirroring `gateway_payment::api::require_shared_secret`.
/// Unused by any endpoint today (the upload service's public surface has no
/// inter-service-only routes of its own), but kept alongside `configure` so a
/// future protected route doesn't have to invent the check from scratch.
#[allow(dead_code)]
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
