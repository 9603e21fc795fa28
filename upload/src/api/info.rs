//! `GET /info` (§6).

use actix_web::{web, HttpResponse};
use serde::Serialize;

use gateway_common::GatewayError;

use crate::deps::Deps;

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub version: String,
    pub bundler_addresses: Vec<BundlerAddress>,
    pub free_upload_limit_bytes: u64,
    pub downstream_gateway_urls: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BundlerAddress {
    pub key_id: String,
    pub address: String,
}

/// `GET /info` — version, bundler addresses, free-upload limit, downstream caches.
pub async fn info(deps: web::Data<Deps>) -> Result<HttpResponse, GatewayError> {
    Ok(HttpResponse::Ok().json(InfoResponse {
        version: deps.protocol_version.clone(),
        bundler_addresses: vec![BundlerAddress {
            key_id: deps.signer_key_id.clone(),
            address: hex::encode(deps.bundler_signing_key.verifying_key().to_bytes()),
        }],
        free_upload_limit_bytes: deps.free_upload_limit_bytes,
        downstream_gateway_urls: deps.downstream_gateway_urls.clone(),
    }))
}
