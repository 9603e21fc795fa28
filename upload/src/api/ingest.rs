//! `POST /tx` (one-shot) and `POST /tx/raw` (raw blob) — §4.5 steps 1-2 live
//! here (reading `Content-Length`/`X-PAYMENT`, bounding the body); everything
//! from step 2 onward is `crate::ingest`'s job.

use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::StreamExt;

use gateway_common::GatewayError;

use crate::deps::Deps;
use crate::gasless_client;
use crate::ingest::{self, IngestRequest};

fn x_payment_header(req: &HttpRequest) -> Option<String> {
    req.headers().get("X-PAYMENT").and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn content_length(req: &HttpRequest) -> Option<u64> {
    req.headers().get(actix_web::http::header::CONTENT_LENGTH).and_then(|v| v.to_str().ok()).and_then(|v| v.parse().ok())
}

/// Reads the request body up to `max` bytes, rejecting oversized bodies by their
/// declared `Content-Length` before consuming any of the stream (§4.4 "Bodies
/// that exceed the configured maximum are rejected before any IO").
async fn read_bounded_body(req: &HttpRequest, mut payload: web::Payload, max: u64) -> Result<Vec<u8>, GatewayError> {
    if let Some(declared) = content_length(req) {
        if declared > max {
            return Err(GatewayError::PayloadTooLarge { size: declared, max });
        }
    }

    let mut bytes = Vec::with_capacity(content_length(req).unwrap_or(0).min(max) as usize);
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| GatewayError::ClientMalformed(format!("failed reading request body: {e}")))?;
        if bytes.len() as u64 + chunk.len() as u64 > max {
            return Err(GatewayError::PayloadTooLarge { size: bytes.len() as u64 + chunk.len() as u64, max });
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

fn current_height_fn(height: u64) -> Arc<dyn Fn() -> u64 + Send + Sync> {
    Arc::new(move || height)
}

async fn current_height(deps: &Deps) -> Result<u64, GatewayError> {
    deps.chain_gateway.current_height().await.map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))
}

fn outcome_response(status: actix_web::http::StatusCode, outcome: ingest::IngestOutcome) -> HttpResponse {
    let mut builder = HttpResponse::build(status);
    if let Some(record) = &outcome.gasless_response {
        builder.insert_header(("X-Payment-Response", gasless_client::encode_payment_response(record)));
    }
    builder.json(outcome.receipt)
}

/// `POST /tx` (§4.5 "One-shot").
pub async fn one_shot(req: HttpRequest, payload: web::Payload, deps: web::Data<Deps>) -> Result<HttpResponse, GatewayError> {
    let payment_header = x_payment_header(&req);
    if payment_header.is_some() && content_length(&req).is_none() {
        return Err(GatewayError::ContentLengthRequired);
    }
    let declared_content_length = content_length(&req);

    let bytes = read_bounded_body(&req, payload, ingest::max_item_size_bytes()).await?;

    let height = current_height(&deps).await?;
    let ingest_deps = deps.ingest_deps(current_height_fn(height));
    let request = IngestRequest { bytes, declared_content_length, payment_header };

    let outcome = ingest::ingest_one_shot(&ingest_deps, request).await.map_err(|e| e.to_gateway_error())?;
    Ok(outcome_response(actix_web::http::StatusCode::CREATED, outcome))
}

/// `POST /tx/raw` (§4.5 "Raw blob"): gasless payment is required, no balance
/// fallback.
pub async fn raw_blob(req: HttpRequest, payload: web::Payload, deps: web::Data<Deps>) -> Result<HttpResponse, GatewayError> {
    let payment_header = x_payment_header(&req).ok_or(GatewayError::PaymentRequired)?;
    if content_length(&req).is_none() {
        return Err(GatewayError::ContentLengthRequired);
    }

    let bytes = read_bounded_body(&req, payload, ingest::max_item_size_bytes()).await?;

    let height = current_height(&deps).await?;
    let ingest_deps = deps.ingest_deps(current_height_fn(height));

    let outcome = ingest::ingest_raw_blob(&ingest_deps, bytes, &payment_header).await.map_err(|e| e.to_gateway_error())?;
    Ok(outcome_response(actix_web::http::StatusCode::CREATED, outcome))
}
