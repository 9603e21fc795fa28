//! §4.8 "optical-post": fans an accepted item's envelope header (not its payload)
//! out to downstream optimistic caches, each destination fronted by its own
//! [`CircuitBreaker`] (§9 design note "generic over destination"). Best-effort:
//! a destination's failure is logged and swallowed, never propagated to the job
//! fabric's retry/backoff.

use gateway_common::circuit_breaker::CircuitBreaker;
use gateway_common::ContentId;

use crate::deps::Deps;
use crate::items::DataItem;
use crate::queue::Job;

pub async fn handle(deps: &Deps, job: &Job) -> anyhow::Result<()> {
    let content_id = super::content_id_from_payload(job)?;
    post(deps, content_id).await
}

async fn post(deps: &Deps, content_id: ContentId) -> anyhow::Result<()> {
    let item = deps.item_store.get(content_id).await?.ok_or_else(|| anyhow::anyhow!("item {content_id} not found"))?;
    if should_skip(deps, &item) {
        return Ok(());
    }

    let envelope_bytes = deps
        .triple_store
        .read_item(content_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("item {content_id} missing from the triple store"))?;
    let parsed = gateway_common::envelope::parse(&envelope_bytes, None)?;
    let header = &envelope_bytes[..parsed.payload_offset];

    let (urls, breakers) = destinations_for(deps, &item);
    let client = reqwest::Client::new();
    for (index, url) in urls.iter().enumerate() {
        post_to_one(&client, deps, url, header, breakers.get(index)).await;
    }

    if let Some(canary_url) = &deps.downstream_gateway_canary_url {
        if sampled(deps.canary_sample_fraction_bps) {
            let canary_breaker = deps.downstream_breakers.get(deps.downstream_gateway_urls.len());
            post_to_one(&client, deps, canary_url, header, canary_breaker).await;
        }
    }

    Ok(())
}

/// §4.8 filter: free-allowlisted signers get no downstream fan-out, and a nested
/// bundle container itself is a low-priority message (its constituents are fanned
/// out individually once `unbundle-nested` explodes it, so posting the container
/// too would just be the same bytes twice).
fn should_skip(deps: &Deps, item: &DataItem) -> bool {
    deps.policy.is_free(&item.owner_address) || item.is_nested_bundle
}

/// §4.8 "items tagged for a specific premium ecosystem are routed only to that
/// ecosystem's dedicated secondaries": a premium-tagged item whose tag has a
/// configured route bypasses the general fan-out entirely; everything else (and a
/// premium tag absent from the config) falls back to it.
fn destinations_for<'a>(deps: &'a Deps, item: &DataItem) -> (&'a [String], &'a [CircuitBreaker]) {
    if let Some(tag) = &item.premium_tag {
        if let Some(urls) = deps.premium_downstream_urls.get(tag) {
            let breakers = deps.premium_downstream_breakers.get(tag).map(|b| b.as_slice()).unwrap_or(&[]);
            return (urls.as_slice(), breakers);
        }
    }
    (deps.downstream_gateway_urls.as_slice(), deps.downstream_breakers.as_slice())
}

fn sampled(fraction_bps: u32) -> bool {
    if fraction_bps == 0 {
        return false;
    }
    if fraction_bps >= 10_000 {
        return true;
    }
    rand::random::<u32>() % 10_000 < fraction_bps
}

async fn post_to_one(client: &reqwest::Client, deps: &Deps, url: &str, header: &[u8], breaker: Option<&CircuitBreaker>) {
    if let Some(breaker) = breaker {
        if !breaker.allow_request() {
            log::warn!("optical-post to {url} skipped: circuit open");
            return;
        }
    }

    let result = client
        .post(format!("{url}/optical/items"))
        .header("X-Admin-Key", &deps.downstream_gateway_admin_key)
        .timeout(std::time::Duration::from_secs(10))
        .body(header.to_vec())
        .send()
        .await;

    match result {
        Ok(response) if response.status().is_success() => {
            if let Some(breaker) = breaker {
                breaker.record_success();
            }
        }
        Ok(response) => {
            if let Some(breaker) = breaker {
                breaker.record_failure();
            }
            log::warn!("optical-post to {url} returned {}", response.status());
        }
        Err(err) => {
            if let Some(breaker) = breaker {
                breaker.record_failure();
            }
            log::warn!("optical-post to {url} failed (best-effort, ignored): {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use gateway_common::money::Credits;
    use gateway_common::tags::{well_known, TagList};
    use uuid::Uuid;

    use super::*;
    use crate::deps::test_support::fake_deps;
    use crate::ingest::IngestPolicy;
    use crate::items::ItemStore;
    use crate::queue::{JobStatus, QueueName};
    use std::collections::HashSet;

    fn job_for(id: ContentId) -> Job {
        Job {
            id: Uuid::new_v4(),
            queue: QueueName::OpticalPost,
            payload: serde_json::json!({ "content_id": id.to_base64url() }),
            attempt: 0,
            status: JobStatus::Running,
            available_at: Utc::now(),
            created_at: Utc::now(),
            last_error: None,
        }
    }

    fn signed_envelope(payload: &[u8], tags: &TagList) -> Vec<u8> {
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

    #[test]
    fn free_allowlisted_owner_is_skipped() {
        let mut deps = fake_deps();
        deps.policy = IngestPolicy { blocklist: HashSet::new(), free_allowlist: HashSet::from(["alice".to_string()]) };
        let item = DataItem::new(ContentId::from_signature(b"x"), "alice", 10, Credits::ZERO, &TagList::default(), 1_000, None);
        assert!(should_skip(&deps, &item));
    }

    #[test]
    fn nested_bundle_container_is_skipped() {
        let deps = fake_deps();
        let mut tags = TagList::default();
        tags.push(well_known::CONTENT_TYPE, well_known::NESTED_BUNDLE_CONTENT_TYPE);
        let item = DataItem::new(ContentId::from_signature(b"x"), "alice", 10, Credits::ZERO, &tags, 1_000, None);
        assert!(item.is_nested_bundle);
        assert!(should_skip(&deps, &item));
    }

    #[test]
    fn ordinary_item_is_not_skipped() {
        let deps = fake_deps();
        let item = DataItem::new(ContentId::from_signature(b"x"), "alice", 10, Credits::ZERO, &TagList::default(), 1_000, None);
        assert!(!should_skip(&deps, &item));
    }

    #[test]
    fn premium_tagged_item_routes_only_to_its_own_secondaries() {
        let mut deps = fake_deps();
        deps.premium_downstream_urls.insert("gold".to_string(), vec!["https://gold.example".to_string()]);
        deps.premium_downstream_breakers.insert("gold".to_string(), vec![CircuitBreaker::new()]);

        let mut item = DataItem::new(ContentId::from_signature(b"x"), "alice", 10, Credits::ZERO, &TagList::default(), 1_000, None);
        item.premium_tag = Some("gold".to_string());

        let (urls, _) = destinations_for(&deps, &item);
        assert_eq!(urls, ["https://gold.example"]);
    }

    #[test]
    fn premium_tag_with_no_configured_route_falls_back_to_the_general_fan_out() {
        let deps = fake_deps();
        let mut item = DataItem::new(ContentId::from_signature(b"x"), "alice", 10, Credits::ZERO, &TagList::default(), 1_000, None);
        item.premium_tag = Some("unconfigured-tag".to_string());

        let (urls, _) = destinations_for(&deps, &item);
        assert_eq!(urls, deps.downstream_gateway_urls.as_slice());
    }

    #[test]
    fn sampling_is_deterministic_at_the_extremes() {
        assert!(!sampled(0));
        assert!(sampled(10_000));
    }

    #[tokio::test]
    async fn posting_an_ordinary_item_is_best_effort_and_never_fails_the_job() {
        let deps = fake_deps();
        let envelope = signed_envelope(b"cached payload", &TagList::default());
        let content_id = gateway_common::envelope::parse(&envelope, None).unwrap().content_id;

        deps.item_store
            .insert_batch(vec![DataItem::new(content_id, "alice", envelope.len() as u64, Credits::ZERO, &TagList::default(), 1_000, None)])
            .await
            .unwrap();
        deps.triple_store.write_item(content_id, &envelope).await.unwrap();

        handle(&deps, &job_for(content_id)).await.unwrap();
    }

    #[tokio::test]
    async fn skipped_items_never_touch_the_triple_store() {
        let mut deps = fake_deps();
        deps.policy = IngestPolicy { blocklist: HashSet::new(), free_allowlist: HashSet::from(["alice".to_string()]) };
        let content_id = ContentId::from_signature(b"never-read");
        deps.item_store
            .insert_batch(vec![DataItem::new(content_id, "alice", 10, Credits::ZERO, &TagList::default(), 1_000, None)])
            .await
            .unwrap();

        // no bytes written to the triple store: if `post` tried to read the item it
        // would error, so success here proves the skip happened before that read.
        handle(&deps, &job_for(content_id)).await.unwrap();
    }
}
