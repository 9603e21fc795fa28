//! `POST /multipart`, `PUT /multipart/:sid/:offset`, `POST /multipart/:sid/finalize`,
//! `POST /multipart/:sid/abort`, `GET /multipart/:sid`/`.../status` (§4.5
//! "Multipart session").

use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gateway_common::GatewayError;

use crate::deps::Deps;
use crate::multipart::{self, MultipartError, MultipartSession, SessionStatus};
use crate::queue::QueueName;

impl From<MultipartError> for GatewayError {
    fn from(err: MultipartError) -> Self {
        match err {
            MultipartError::NotFound(id) => GatewayError::NotFound(format!("multipart session {id}")),
            MultipartError::WrongState(id, status) => GatewayError::Conflict(format!("session {id} is {status:?}")),
            MultipartError::ChunkSizeOutOfBounds(_) | MultipartError::TooManyChunks => GatewayError::ClientMalformed(err.to_string()),
            MultipartError::Incomplete => GatewayError::ClientMalformed(err.to_string()),
            MultipartError::Store(e) => GatewayError::internal(e),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub size: u64,
    #[serde(default, rename = "chunkSize")]
    pub chunk_size: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: Uuid,
    pub declared_total_size: u64,
    pub chunk_size: u64,
    pub uploaded_bytes: u64,
    pub status: SessionStatus,
}

impl From<MultipartSession> for SessionResponse {
    fn from(session: MultipartSession) -> Self {
        let uploaded_bytes = session
            .uploaded_chunk_offsets
            .iter()
            .map(|&offset| session.chunk_size.min(session.declared_total_size.saturating_sub(offset)))
            .sum();
        SessionResponse {
            id: session.id,
            declared_total_size: session.declared_total_size,
            chunk_size: session.chunk_size,
            uploaded_bytes,
            status: session.status,
        }
    }
}

/// `POST /multipart` (§4.5 "create").
pub async fn create(body: web::Json<CreateRequest>, deps: web::Data<Deps>) -> Result<HttpResponse, GatewayError> {
    let session = MultipartSession::new(body.size, body.chunk_size)?;
    let response = SessionResponse::from(session.clone());
    deps.multipart_store.insert(session).await?;
    Ok(HttpResponse::Created().json(response))
}

/// `PUT /multipart/:sid/:offset` (§4.5 "chunk upload").
pub async fn chunk(
    path: web::Path<(Uuid, u64)>,
    mut payload: web::Payload,
    deps: web::Data<Deps>,
) -> Result<HttpResponse, GatewayError> {
    let (session_id, offset) = path.into_inner();
    let session = deps.multipart_store.get(session_id).await?.ok_or_else(|| GatewayError::NotFound(format!("multipart session {session_id}")))?;
    if session.status != SessionStatus::InProgress {
        return Err(GatewayError::Conflict(format!("session {session_id} is {:?}", session.status)));
    }

    let mut bytes = Vec::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| GatewayError::ClientMalformed(format!("failed reading chunk body: {e}")))?;
        bytes.extend_from_slice(&chunk);
    }
    let etag = blake3::hash(&bytes).to_hex().to_string();

    deps.triple_store.cold.put_keyed(multipart::CHUNK_NAMESPACE, &multipart::chunk_key(session_id, offset), &bytes).await.map_err(GatewayError::internal)?;
    deps.multipart_store.record_chunk(session_id, offset).await?;

    Ok(HttpResponse::Ok().insert_header(("ETag", etag)).finish())
}

/// `POST /multipart/:sid/finalize` (§4.5 "finalize" / §4.8 "finalize-multipart").
/// Finalization itself runs asynchronously on the `finalize-multipart` queue so
/// this handler only validates the chunk set is ready and hands the session off.
pub async fn finalize(path: web::Path<Uuid>, deps: web::Data<Deps>) -> Result<HttpResponse, GatewayError> {
    let session_id = path.into_inner();
    let session = deps.multipart_store.get(session_id).await?.ok_or_else(|| GatewayError::NotFound(format!("multipart session {session_id}")))?;
    if session.status != SessionStatus::InProgress {
        return Err(GatewayError::Conflict(format!("session {session_id} is {:?}", session.status)));
    }
    if !session.is_complete() {
        return Err(GatewayError::ClientMalformed("chunk set is not contiguous or does not total the declared size".into()));
    }

    deps.job_queue
        .enqueue(QueueName::FinalizeMultipart, serde_json::json!({ "session_id": session_id.to_string() }))
        .await
        .map_err(GatewayError::internal)?;

    Ok(HttpResponse::Accepted().json(SessionResponse::from(session)))
}

/// `POST /multipart/:sid/abort` (§4.5 "abort").
pub async fn abort(path: web::Path<Uuid>, deps: web::Data<Deps>) -> Result<HttpResponse, GatewayError> {
    let session_id = path.into_inner();
    deps.multipart_store.get(session_id).await?.ok_or_else(|| GatewayError::NotFound(format!("multipart session {session_id}")))?;
    deps.multipart_store.set_status(session_id, SessionStatus::Aborted).await?;
    Ok(HttpResponse::Ok().finish())
}

/// `GET /multipart/:sid` / `GET /multipart/:sid/status` (§6).
pub async fn status(req: HttpRequest, deps: web::Data<Deps>) -> Result<HttpResponse, GatewayError> {
    let session_id: Uuid = req
        .match_info()
        .get("sid")
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| GatewayError::ClientMalformed("malformed session id".into()))?;
    let session = deps.multipart_store.get(session_id).await?.ok_or_else(|| GatewayError::NotFound(format!("multipart session {session_id}")))?;
    Ok(HttpResponse::Ok().json(SessionResponse::from(session)))
}
