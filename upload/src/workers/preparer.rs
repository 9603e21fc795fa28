//! §4.8 "preparer": assembles one plan's bundle header and payload, signs the
//! resulting chain transaction with the bundler key, and hands off to `poster`.
//!
//! DESIGN.md Open Question: whether signing happens here or at `poster`. This
//! module signs here and derives the transaction id the same way [`ContentId`]
//! derives an item id — `blake3(signature)` — so `bundle_plan::BundlePlanStore`'s
//! own doc comment ("Prepare writes the bundle transaction row... racing
//! double-prepare is a no-op") holds: the id must exist before the row is
//! inserted. `poster` broadcasts these exact already-signed bytes.

use ed25519_dalek::Signer;
use futures::stream::{self, StreamExt};
use gateway_common::bundle;
use gateway_common::config::PREPARER_FETCH_CONCURRENCY;
use gateway_common::envelope;
use gateway_common::tags::{well_known, TagList};
use gateway_common::ContentId;
use uuid::Uuid;

use crate::bundle_plan::{BundlePlan, BundleTransaction, PlanStatus};
use crate::deps::Deps;
use crate::offset_index::OffsetRecord;
use crate::queue::{Job, QueueName};

const OFFSET_EMIT_BATCH_SIZE: usize = gateway_common::config::PREPARER_OFFSET_BATCH_SIZE;

pub async fn handle(deps: &Deps, job: &Job) -> anyhow::Result<()> {
    let plan_id = super::plan_id_from_payload(job)?;
    prepare_plan(deps, plan_id).await
}

async fn prepare_plan(deps: &Deps, plan_id: Uuid) -> anyhow::Result<()> {
    let plan = deps.bundle_plan_store.get_plan(plan_id).await?.ok_or_else(|| anyhow::anyhow!("plan {plan_id} not found"))?;

    // §4.8 "If persistence races with an already-prepared plan: no-op".
    if deps.bundle_plan_store.get_transaction(plan_id).await?.is_some() {
        return Ok(());
    }

    // step 1: fetch planned items' envelope bytes from cold store, <= 100 concurrent.
    let fetched: Vec<(ContentId, Option<Vec<u8>>)> = stream::iter(plan.item_ids.clone())
        .map(|id| async move { (id, deps.triple_store.cold.get(id).await.ok().flatten()) })
        .buffer_unordered(PREPARER_FETCH_CONCURRENCY)
        .collect()
        .await;

    let mut present = Vec::with_capacity(fetched.len());
    let mut missing = Vec::new();
    for (id, bytes) in fetched {
        match bytes {
            Some(b) => present.push((id, b)),
            None => missing.push(id),
        }
    }

    // step 6: items missing from the object store are dropped from this plan and
    // marked failed; the plan proceeds once, without them (no further recursion).
    for id in &missing {
        deps.item_store.mark_failed(*id, "missing_from_object_store").await?;
    }

    // keep `present` ordered the same way `plan.item_ids` was planned (§5 ordering
    // guarantee: "item order in the payload matches the order recorded in the
    // bundle header and the order of offset records").
    present.sort_by_key(|(id, _)| plan.item_ids.iter().position(|p| p == id).unwrap_or(usize::MAX));

    if present.is_empty() {
        deps.bundle_plan_store.set_status(plan.id, PlanStatus::Dropped).await?;
        return Ok(());
    }

    // step 2/3: assemble the bundle header + payload, then compute per-item start
    // offsets the same way `bundle::encode` lays the payload out.
    let payload = bundle::encode(&present);
    emit_offsets(deps, &plan, &present).await?;

    // step 4: construct + sign the chain transaction.
    let mut tags = TagList::default();
    tags.push(well_known::BUNDLE_FORMAT, well_known::BUNDLE_FORMAT_VALUE);
    tags.push(well_known::BUNDLE_VERSION, well_known::BUNDLE_VERSION_VALUE);
    tags.push(well_known::APP_NAME, &plan.app_name);

    let signature = deps.bundler_signing_key.sign(&payload).to_bytes();
    let tx_id = ContentId::from_signature(&signature).to_base64url();

    // step 5: persist the bundle row, write payload + tags to cold store keyed by
    // plan id, enqueue `post`.
    let inserted = deps
        .bundle_plan_store
        .insert_transaction_if_absent(BundleTransaction {
            plan_id: plan.id,
            tx_id,
            payload_size: payload.len() as u64,
            reward: None,
            native_token_usd_rate: None,
            posted_at: None,
            posted_at_height: None,
        })
        .await?;

    if inserted {
        deps.triple_store.cold.put_keyed("plan_payload", &plan.id.to_string(), &payload).await?;
        let tags_bytes = serde_json::to_vec(&tags)?;
        deps.triple_store.cold.put_keyed("plan_tags", &plan.id.to_string(), &tags_bytes).await?;
        deps.bundle_plan_store.set_status(plan.id, PlanStatus::Prepared).await?;
        deps.job_queue.enqueue(QueueName::Poster, serde_json::json!({ "plan_id": plan.id.to_string() })).await?;
    }
    Ok(())
}

/// §4.8 step 3: "Compute per-item `start_offset_in_bundle` during streaming; emit
/// the offsets batched (<= 250 per emit) onto the `putOffsets` queue."
async fn emit_offsets(deps: &Deps, plan: &BundlePlan, present: &[(ContentId, Vec<u8>)]) -> anyhow::Result<()> {
    let mut records = Vec::with_capacity(present.len());
    // header is a fixed 32-byte count field plus one 64-byte entry per item.
    let mut cursor = 32u64 + present.len() as u64 * 64;
    for (item_id, bytes) in present {
        let parsed = envelope::parse(bytes, None)?;
        records.push(OffsetRecord {
            item_id: *item_id,
            root_bundle_id: plan.id.to_string(),
            start_offset_in_bundle: cursor,
            raw_length: bytes.len() as u64,
            payload_content_type: parsed.decoded_tags.content_type,
            payload_data_start: cursor + parsed.payload_offset as u64,
            parent_data_item_id: None,
            created_at: chrono::Utc::now(),
        });
        cursor += bytes.len() as u64;
    }

    for batch in records.chunks(OFFSET_EMIT_BATCH_SIZE) {
        deps.job_queue
            .enqueue(QueueName::PutOffsets, serde_json::json!({ "records": batch }))
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use gateway_common::money::Credits;

    use super::*;
    use crate::deps::test_support::fake_deps;
    use crate::items::{DataItem, ItemStore};
    use crate::queue::{JobQueue, JobStatus};

    async fn seed_item(deps: &Deps, payload: &[u8]) -> ContentId {
        let signing_key = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);
        let envelope = crate::ingest::build_raw_envelope(payload, "tx-hash", "pay-1", "base", "payer", &signing_key);
        let parsed = envelope::parse(&envelope, None).unwrap();
        deps.triple_store.write_item(parsed.content_id, &envelope).await.unwrap();
        deps.item_store
            .insert_batch(vec![DataItem::new(parsed.content_id, parsed.owner_address.clone(), envelope.len() as u64, Credits(1), &parsed.tags, 1_000, None)])
            .await
            .unwrap();
        parsed.content_id
    }

    fn job_for(plan_id: Uuid) -> Job {
        Job {
            id: Uuid::new_v4(),
            queue: QueueName::Preparer,
            payload: serde_json::json!({ "plan_id": plan_id.to_string() }),
            attempt: 0,
            status: JobStatus::Running,
            available_at: chrono::Utc::now(),
            created_at: chrono::Utc::now(),
            last_error: None,
        }
    }

    #[tokio::test]
    async fn prepares_a_plan_and_enqueues_post() {
        let deps = fake_deps();
        let id_a = seed_item(&deps, b"hello world").await;
        let id_b = seed_item(&deps, b"second item").await;

        let plan = BundlePlan::new(vec![id_a, id_b], 0, None, "bundling-gateway".to_string());
        deps.bundle_plan_store.insert_plan(plan.clone()).await.unwrap();

        handle(&deps, &job_for(plan.id)).await.unwrap();

        let tx = deps.bundle_plan_store.get_transaction(plan.id).await.unwrap().unwrap();
        assert!(tx.payload_size > 0);
        assert_eq!(deps.job_queue.running_count(QueueName::Poster).await.unwrap(), 0);

        let posted = deps.job_queue.claim(QueueName::Poster).await.unwrap();
        assert!(posted.is_some());
    }

    #[tokio::test]
    async fn double_prepare_is_a_no_op() {
        let deps = fake_deps();
        let id_a = seed_item(&deps, b"only item").await;
        let plan = BundlePlan::new(vec![id_a], 0, None, "bundling-gateway".to_string());
        deps.bundle_plan_store.insert_plan(plan.clone()).await.unwrap();

        handle(&deps, &job_for(plan.id)).await.unwrap();
        let tx_first = deps.bundle_plan_store.get_transaction(plan.id).await.unwrap().unwrap();

        handle(&deps, &job_for(plan.id)).await.unwrap();
        let tx_second = deps.bundle_plan_store.get_transaction(plan.id).await.unwrap().unwrap();
        assert_eq!(tx_first.tx_id, tx_second.tx_id);
    }

    #[tokio::test]
    async fn drops_items_missing_from_cold_store() {
        let deps = fake_deps();
        let missing_id = ContentId::from_signature(b"never written");
        deps.item_store
            .insert_batch(vec![DataItem::new(missing_id, "alice", 10, Credits(1), &TagList::default(), 1_000, None)])
            .await
            .unwrap();

        let plan = BundlePlan::new(vec![missing_id], 0, None, "bundling-gateway".to_string());
        deps.bundle_plan_store.insert_plan(plan.clone()).await.unwrap();

        handle(&deps, &job_for(plan.id)).await.unwrap();
        assert_eq!(deps.bundle_plan_store.get_plan(plan.id).await.unwrap().unwrap().status, PlanStatus::Dropped);
        let item = deps.item_store.get(missing_id).await.unwrap().unwrap();
        assert_eq!(item.status, crate::items::ItemStatus::Failed);
    }
}
