//! §4.8 "unbundle-nested": explodes a nested bundle item (detected via its
//! `Content-Type` tag, §3 "bundle-within-item") into its constituent items,
//! computing each one's offsets within the *parent item's* payload rather than
//! within a chain bundle. Reuses the same bundle wire format (§6) a top-level
//! bundle uses, since a nested bundle's payload is itself one.

use chrono::Utc;
use gateway_common::bundle;
use gateway_common::config::STREAMING_VERIFY_THRESHOLD_BYTES;
use gateway_common::envelope;
use gateway_common::money::Credits;
use gateway_common::ContentId;

use crate::deps::Deps;
use crate::items::DataItem;
use crate::offset_index::OffsetRecord;
use crate::queue::{Job, QueueName};

pub async fn handle(deps: &Deps, job: &Job) -> anyhow::Result<()> {
    let content_id = super::content_id_from_payload(job)?;
    unbundle(deps, content_id).await
}

async fn unbundle(deps: &Deps, parent_id: ContentId) -> anyhow::Result<()> {
    let parent_item = deps.item_store.get(parent_id).await?.ok_or_else(|| anyhow::anyhow!("item {parent_id} not found"))?;
    if !parent_item.is_nested_bundle {
        return Ok(());
    }

    let envelope_bytes = deps
        .triple_store
        .read_item(parent_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("item {parent_id} missing from the triple store"))?;
    let parsed_parent = envelope::parse(&envelope_bytes, None)?;
    let payload = &envelope_bytes[parsed_parent.payload_offset..parsed_parent.payload_offset + parsed_parent.payload_len];

    let parsed_bundle = bundle::parse(payload)?;
    let root_bundle_id = parent_item.plan_id.map(|id| id.to_string()).unwrap_or_else(|| parent_id.to_base64url());

    let mut offset_records = Vec::with_capacity(parsed_bundle.item_count());
    for (start, end) in &parsed_bundle.item_ranges {
        let raw = &payload[*start..*end];
        let nested = envelope::parse(raw, None)?;

        // §4.8 "small items inline in the DB, large items to cold store" — the hot
        // cache already is the triple store's inline-in-DB role (§4.6), so small
        // nested items go there and large ones to cold, mirroring `write_item`'s
        // cold-then-best-effort-hot ordering but skipping warm: a nested item never
        // needs its own warm mirror, it rides along inside its parent's.
        if raw.len() as u64 <= STREAMING_VERIFY_THRESHOLD_BYTES {
            deps.triple_store.hot.put(nested.content_id, raw.to_vec()).await?;
        } else {
            deps.triple_store.cold.put(nested.content_id, raw).await?;
        }

        let premium_tag = nested.decoded_tags.app_name.clone().filter(|tag| deps.premium_tags.contains(tag));
        let item = DataItem::new(
            nested.content_id,
            nested.owner_address.clone(),
            nested.total_size() as u64,
            Credits::ZERO,
            &nested.tags,
            parent_item.deadline_height,
            premium_tag,
        );
        deps.item_store.insert_batch(vec![item]).await?;

        deps.job_queue
            .enqueue(QueueName::OpticalPost, serde_json::json!({ "content_id": nested.content_id.to_base64url() }))
            .await?;

        offset_records.push(OffsetRecord {
            item_id: nested.content_id,
            root_bundle_id: root_bundle_id.clone(),
            start_offset_in_bundle: *start as u64,
            raw_length: (*end - *start) as u64,
            payload_content_type: nested.decoded_tags.content_type.clone(),
            payload_data_start: *start as u64 + nested.payload_offset as u64,
            parent_data_item_id: Some(parent_id),
            created_at: Utc::now(),
        });
    }

    deps.job_queue.enqueue(QueueName::PutOffsets, serde_json::json!({ "records": offset_records })).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::deps::test_support::fake_deps;
    use crate::items::ItemStore;
    use crate::queue::{JobQueue, JobStatus, QueueName};
    use gateway_common::tags::{self as common_tags, well_known};

    fn signed_envelope(payload: &[u8], tags: &common_tags::TagList) -> Vec<u8> {
        use ed25519_dalek::Signer;
        let signing_key = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);
        let mut signed_region = signing_key.verifying_key().to_bytes().to_vec();
        signed_region.push(0);
        signed_region.push(0);

        let mut tag_region = Vec::new();
        for tag in &tags.0 {
            tag_region.extend_from_slice(&(tag.name.len() as u16).to_le_bytes());
            tag_region.extend_from_slice(tag.name.as_bytes());
            tag_region.extend_from_slice(&(tag.value.len() as u16).to_le_bytes());
            tag_region.extend_from_slice(tag.value.as_bytes());
        }
        signed_region.extend_from_slice(&(tag_region.len() as u32).to_le_bytes());
        signed_region.extend_from_slice(&tag_region);
        signed_region.extend_from_slice(payload);

        let signature = signing_key.sign(&signed_region);
        let mut envelope = vec![2u8, 0u8];
        envelope.extend_from_slice(&signature.to_bytes());
        envelope.extend_from_slice(&signed_region);
        envelope
    }

    fn job_for(id: ContentId) -> Job {
        Job {
            id: Uuid::new_v4(),
            queue: QueueName::UnbundleNested,
            payload: serde_json::json!({ "content_id": id.to_base64url() }),
            attempt: 0,
            status: JobStatus::Running,
            available_at: chrono::Utc::now(),
            created_at: chrono::Utc::now(),
            last_error: None,
        }
    }

    #[tokio::test]
    async fn explodes_a_nested_bundle_into_its_constituent_items() {
        let deps = fake_deps();

        let mut inner_tags = common_tags::TagList::default();
        inner_tags.push(well_known::CONTENT_TYPE, "text/plain");
        let inner_one = signed_envelope(b"inner item one", &inner_tags);
        let inner_two = signed_envelope(b"inner item two bytes", &inner_tags);

        let inner_bundle = bundle::encode(&[
            (envelope::parse(&inner_one, None).unwrap().content_id, inner_one.clone()),
            (envelope::parse(&inner_two, None).unwrap().content_id, inner_two.clone()),
        ]);

        let mut parent_tags = common_tags::TagList::default();
        parent_tags.push(well_known::CONTENT_TYPE, well_known::NESTED_BUNDLE_CONTENT_TYPE);
        let parent_envelope = signed_envelope(&inner_bundle, &parent_tags);
        let parent_id = envelope::parse(&parent_envelope, None).unwrap().content_id;

        deps.item_store
            .insert_batch(vec![DataItem::new(parent_id, "alice", parent_envelope.len() as u64, Credits::ZERO, &parent_tags, 1_000, None)])
            .await
            .unwrap();
        deps.triple_store.write_item(parent_id, &parent_envelope).await.unwrap();

        handle(&deps, &job_for(parent_id)).await.unwrap();

        let inner_one_id = envelope::parse(&inner_one, None).unwrap().content_id;
        let inner_two_id = envelope::parse(&inner_two, None).unwrap().content_id;
        assert!(deps.item_store.get(inner_one_id).await.unwrap().is_some());
        assert!(deps.item_store.get(inner_two_id).await.unwrap().is_some());

        assert_eq!(deps.job_queue.running_count(QueueName::OpticalPost).await.unwrap(), 0);
        assert!(deps.job_queue.claim(QueueName::OpticalPost).await.unwrap().is_some());
        assert!(deps.job_queue.claim(QueueName::OpticalPost).await.unwrap().is_some());

        let put_offsets_job = deps.job_queue.claim(QueueName::PutOffsets).await.unwrap().unwrap();
        let records: Vec<OffsetRecord> = serde_json::from_value(put_offsets_job.payload["records"].clone()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].parent_data_item_id, Some(parent_id));
    }

    #[tokio::test]
    async fn a_non_nested_item_is_left_alone() {
        let deps = fake_deps();
        let id = ContentId::from_signature(b"plain item");
        deps.item_store
            .insert_batch(vec![DataItem::new(id, "alice", 10, Credits::ZERO, &common_tags::TagList::default(), 1_000, None)])
            .await
            .unwrap();

        handle(&deps, &job_for(id)).await.unwrap();
        assert!(deps.job_queue.claim(QueueName::OpticalPost).await.unwrap().is_none());
    }
}
