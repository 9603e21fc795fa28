//! §4.5 "Multipart session: finalize" / §4.8 "finalize-multipart": reassembles a
//! completed multipart session's chunks in offset order and re-enters the
//! one-shot ingestion pipeline (§4.5 steps 2-8) against the assembled envelope,
//! exactly as if the client had uploaded it in a single call.

use std::sync::Arc;

use uuid::Uuid;

use crate::deps::Deps;
use crate::ingest::IngestRequest;
use crate::multipart::{self, SessionStatus};
use crate::queue::Job;

pub async fn handle(deps: &Deps, job: &Job) -> anyhow::Result<()> {
    let session_id = super::session_id_from_payload(job)?;
    finalize(deps, session_id).await
}

async fn finalize(deps: &Deps, session_id: Uuid) -> anyhow::Result<()> {
    let session = deps
        .multipart_store
        .get(session_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("multipart session {session_id} not found"))?;

    match session.status {
        SessionStatus::Finalized => return Ok(()),
        SessionStatus::Aborted => anyhow::bail!("multipart session {session_id} was aborted"),
        SessionStatus::InProgress => {}
    }
    if !session.is_complete() {
        anyhow::bail!("multipart session {session_id} chunk set is incomplete");
    }

    let mut assembled = Vec::with_capacity(session.declared_total_size as usize);
    for &offset in &session.uploaded_chunk_offsets {
        let chunk = deps
            .triple_store
            .cold
            .get_keyed(multipart::CHUNK_NAMESPACE, &multipart::chunk_key(session_id, offset))
            .await?
            .ok_or_else(|| anyhow::anyhow!("multipart session {session_id} missing chunk at offset {offset}"))?;
        assembled.extend_from_slice(&chunk);
    }

    let height = deps.chain_gateway.current_height().await?;
    let current_height: Arc<dyn Fn() -> u64 + Send + Sync> = Arc::new(move || height);
    let ingest_deps = deps.ingest_deps(current_height);
    let request = IngestRequest { bytes: assembled, declared_content_length: Some(session.declared_total_size), payment_header: None };

    // `ingest_one_shot` already refunds/finalizes any payment on its own failure
    // paths (§4.5 step 7); finalize-multipart's job is only to reflect that
    // outcome onto the session (§4.8 "fatal errors transition the session to
    // aborted with refund").
    match crate::ingest::ingest_one_shot(&ingest_deps, request).await {
        Ok(_) => {
            deps.multipart_store.set_status(session_id, SessionStatus::Finalized).await?;
            Ok(())
        }
        Err(err) => {
            deps.multipart_store.set_status(session_id, SessionStatus::Aborted).await?;
            Err(anyhow::anyhow!(err.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::deps::test_support::fake_deps;
    use crate::multipart::MultipartSession;
    use crate::queue::{JobStatus, QueueName};

    fn job_for(session_id: Uuid) -> Job {
        Job {
            id: Uuid::new_v4(),
            queue: QueueName::FinalizeMultipart,
            payload: serde_json::json!({ "session_id": session_id.to_string() }),
            attempt: 0,
            status: JobStatus::Running,
            available_at: Utc::now(),
            created_at: Utc::now(),
            last_error: None,
        }
    }

    fn signed_envelope(payload: &[u8]) -> Vec<u8> {
        use ed25519_dalek::Signer;
        let signing_key = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);
        let mut signed_region = signing_key.verifying_key().to_bytes().to_vec();
        signed_region.push(0);
        signed_region.push(0);
        signed_region.extend_from_slice(&0u32.to_le_bytes());
        signed_region.extend_from_slice(payload);
        let signature = signing_key.sign(&signed_region);
        let mut envelope = vec![2u8, 0u8];
        envelope.extend_from_slice(&signature.to_bytes());
        envelope.extend_from_slice(&signed_region);
        envelope
    }

    #[tokio::test]
    async fn reassembles_chunks_in_order_and_ingests_the_result() {
        let deps = fake_deps();
        let envelope = signed_envelope(b"reassembled payload bytes");
        let mut session = MultipartSession::new(envelope.len() as u64, None).unwrap();
        session.chunk_size = 10;
        let session_id = session.id;

        for (i, chunk) in envelope.chunks(10).enumerate() {
            let offset = (i * 10) as u64;
            deps.triple_store.cold.put_keyed(multipart::CHUNK_NAMESPACE, &multipart::chunk_key(session_id, offset), chunk).await.unwrap();
            session.uploaded_chunk_offsets.insert(offset);
        }
        deps.multipart_store.insert(session).await.unwrap();

        handle(&deps, &job_for(session_id)).await.unwrap();

        let finalized = deps.multipart_store.get(session_id).await.unwrap().unwrap();
        assert_eq!(finalized.status, SessionStatus::Finalized);
    }

    #[tokio::test]
    async fn finalizing_an_incomplete_session_is_an_error() {
        let deps = fake_deps();
        let session = MultipartSession::new(1_000, None).unwrap();
        let session_id = session.id;
        deps.multipart_store.insert(session).await.unwrap();

        assert!(handle(&deps, &job_for(session_id)).await.is_err());
    }

    #[tokio::test]
    async fn re_finalizing_an_already_finalized_session_is_a_no_op() {
        let deps = fake_deps();
        let mut session = MultipartSession::new(10, None).unwrap();
        session.status = SessionStatus::Finalized;
        let session_id = session.id;
        deps.multipart_store.insert(session).await.unwrap();

        handle(&deps, &job_for(session_id)).await.unwrap();
    }
}
