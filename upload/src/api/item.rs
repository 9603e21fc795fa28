//! `GET /tx/:id` and `GET /tx/:id/offset` (§6, §4.9).

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Serialize;

use gateway_common::money::Credits;
use gateway_common::{ContentId, GatewayError};

use crate::deps::Deps;
use crate::items::ItemStatus;

fn parse_content_id(req: &HttpRequest) -> Result<ContentId, GatewayError> {
    req.match_info()
        .get("id")
        .ok_or_else(|| GatewayError::ClientMalformed("missing item id".into()))?
        .parse()
        .map_err(|e: &str| GatewayError::ClientMalformed(format!("malformed item id: {e}")))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemStatusWire {
    Finalized,
    Confirmed,
    Failed,
}

#[derive(Debug, Serialize)]
pub struct ItemStatusResponse {
    pub status: ItemStatusWire,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,
    pub credits_charged: Credits,
}

/// `GET /tx/:id` — `{status in FINALIZED|CONFIRMED|FAILED, offset?, block_height?, credits_charged?}`.
pub async fn status(req: HttpRequest, deps: web::Data<Deps>) -> Result<HttpResponse, GatewayError> {
    let id = parse_content_id(&req)?;
    let item = deps.item_store.get(id).await.map_err(GatewayError::internal)?.ok_or_else(|| GatewayError::NotFound(format!("item {id}")))?;

    let wire_status = match item.status {
        ItemStatus::New | ItemStatus::Planned => ItemStatusWire::Finalized,
        ItemStatus::Permanent => ItemStatusWire::Confirmed,
        ItemStatus::Failed => ItemStatusWire::Failed,
    };

    let offset = deps.offset_index_store.get(id).await.map_err(GatewayError::internal)?;
    let block_height = match item.plan_id {
        Some(plan_id) => deps
            .bundle_plan_store
            .get_transaction(plan_id)
            .await
            .map_err(GatewayError::internal)?
            .and_then(|tx| tx.posted_at_height),
        None => None,
    };

    Ok(HttpResponse::Ok().json(ItemStatusResponse {
        status: wire_status,
        offset: offset.as_ref().map(|o| o.start_offset_in_bundle),
        block_height,
        credits_charged: item.assessed_price,
    }))
}

/// `GET /tx/:id/offset` (§4.9 "point lookup", cache-control 60s).
pub async fn offset(req: HttpRequest, deps: web::Data<Deps>) -> Result<HttpResponse, GatewayError> {
    let id = parse_content_id(&req)?;
    let record = deps.offset_index_store.get(id).await.map_err(GatewayError::internal)?.ok_or_else(|| GatewayError::NotFound(format!("offset record for {id}")))?;
    Ok(HttpResponse::Ok().insert_header(("Cache-Control", "max-age=60")).json(record))
}
