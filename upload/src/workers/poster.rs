//! §4.8 "poster": submits the already-prepared, already-signed bundle transaction
//! to the chain gateway and to the downstream optimistic-cache admin endpoint.

use uuid::Uuid;

use crate::bundle_plan::PlanStatus;
use crate::deps::Deps;
use crate::queue::{Job, QueueName};

pub async fn handle(deps: &Deps, job: &Job) -> anyhow::Result<()> {
    let plan_id = super::plan_id_from_payload(job)?;
    post_plan(deps, plan_id).await
}

async fn post_plan(deps: &Deps, plan_id: Uuid) -> anyhow::Result<()> {
    let plan = deps.bundle_plan_store.get_plan(plan_id).await?.ok_or_else(|| anyhow::anyhow!("plan {plan_id} not found"))?;
    let tx = deps.bundle_plan_store.get_transaction(plan_id).await?.ok_or_else(|| anyhow::anyhow!("plan {plan_id} has no prepared transaction"))?;

    if tx.posted_at.is_some() {
        return Ok(()); // idempotent re-claim after a crash.
    }

    let payload = deps
        .triple_store
        .cold
        .get_keyed("plan_payload", &plan_id.to_string())
        .await?
        .ok_or_else(|| anyhow::anyhow!("plan {plan_id} payload missing from cold store"))?;
    let tags_bytes = deps
        .triple_store
        .cold
        .get_keyed("plan_tags", &plan_id.to_string())
        .await?
        .ok_or_else(|| anyhow::anyhow!("plan {plan_id} tags missing from cold store"))?;
    let tags: gateway_common::tags::TagList = serde_json::from_slice(&tags_bytes)?;

    match deps.chain_gateway.submit_transaction(&payload, &tags, &deps.signer_key_id).await {
        Ok(submitted_tx_id) => {
            if submitted_tx_id != tx.tx_id {
                log::warn!("chain gateway assigned tx id {submitted_tx_id} differs from locally signed tx id {}", tx.tx_id);
            }

            // §4.1 "blockchain-native price feed" stands in here for the oracle the
            // payment service uses elsewhere; upload has no dedicated price-oracle
            // client of its own (DESIGN.md Open Question).
            let rate = deps.chain_gateway.storage_price_per_10_gib().await.unwrap_or_default();
            let posted_at_height = deps.chain_gateway.current_height().await.unwrap_or(0);
            deps.bundle_plan_store.set_transaction_posted(plan_id, rate.to_string(), posted_at_height).await?;
            deps.bundle_plan_store.set_status(plan.id, PlanStatus::Posted).await?;

            notify_optimistic_cache_admin(deps, plan_id, &tx.tx_id).await;

            deps.job_queue.enqueue(QueueName::Seeder, serde_json::json!({ "plan_id": plan_id.to_string() })).await?;
            deps.job_queue.enqueue(QueueName::Verifier, serde_json::json!({ "plan_id": plan_id.to_string() })).await?;
            Ok(())
        }
        Err(err) => {
            let wallet_balance = deps.chain_gateway.wallet_balance().await.unwrap_or(0);
            if wallet_balance == 0 {
                log::error!("chain submit for plan {plan_id} failed with an empty wallet; requeuing items to new: {err}");
                let current_height = deps.chain_gateway.current_height().await.unwrap_or(0);
                deps.item_store
                    .requeue(&plan.item_ids, &tx.tx_id, current_height + deps.deadline_blocks_ahead)
                    .await?;
                deps.bundle_plan_store.set_status(plan.id, PlanStatus::Dropped).await?;
                Ok(())
            } else {
                Err(anyhow::anyhow!("chain submit for plan {plan_id} failed (wallet balance {wallet_balance}): {err}"))
            }
        }
    }
}

/// §4.8 "Submit ... to the chain gateway and to the optimistic-cache admin
/// endpoint". Best-effort: a downstream cache missing a post does not block the
/// bundle from being considered posted.
async fn notify_optimistic_cache_admin(deps: &Deps, plan_id: Uuid, tx_id: &str) {
    let Some(primary) = deps.downstream_gateway_urls.first() else {
        return;
    };
    let client = reqwest::Client::new();
    let result = client
        .post(format!("{primary}/admin/bundles"))
        .header("X-Admin-Key", &deps.downstream_gateway_admin_key)
        .json(&serde_json::json!({ "planId": plan_id, "txId": tx_id }))
        .send()
        .await;
    if let Err(err) = result {
        log::warn!("optimistic-cache admin notify for plan {plan_id} failed (best-effort, ignored): {err}");
    }
}

#[cfg(test)]
mod tests {
    use gateway_common::ContentId;

    use super::*;
    use crate::bundle_plan::{BundlePlan, BundleTransaction};
    use crate::deps::test_support::fake_deps;
    use crate::items::{DataItem, ItemStore};
    use crate::queue::{JobQueue, JobStatus};

    fn job_for(plan_id: Uuid) -> Job {
        Job {
            id: Uuid::new_v4(),
            queue: QueueName::Poster,
            payload: serde_json::json!({ "plan_id": plan_id.to_string() }),
            attempt: 0,
            status: JobStatus::Running,
            available_at: chrono::Utc::now(),
            created_at: chrono::Utc::now(),
            last_error: None,
        }
    }

    async fn seeded_plan(deps: &Deps) -> uuid::Uuid {
        let plan = BundlePlan::new(vec![ContentId::from_signature(b"x")], 0, None, "bundling-gateway".to_string());
        deps.bundle_plan_store.insert_plan(plan.clone()).await.unwrap();
        let payload = b"bundle payload bytes".to_vec();
        deps.triple_store.cold.put_keyed("plan_payload", &plan.id.to_string(), &payload).await.unwrap();
        let tags = gateway_common::tags::TagList::default();
        deps.triple_store.cold.put_keyed("plan_tags", &plan.id.to_string(), &serde_json::to_vec(&tags).unwrap()).await.unwrap();
        deps.bundle_plan_store
            .insert_transaction_if_absent(BundleTransaction {
                plan_id: plan.id,
                tx_id: "precomputed-tx".to_string(),
                payload_size: payload.len() as u64,
                reward: None,
                native_token_usd_rate: None,
                posted_at: None,
                posted_at_height: None,
            })
            .await
            .unwrap();
        plan.id
    }

    #[tokio::test]
    async fn posts_a_prepared_plan_and_enqueues_seed_and_verify() {
        let deps = fake_deps();
        let plan_id = seeded_plan(&deps).await;

        handle(&deps, &job_for(plan_id)).await.unwrap();

        let tx = deps.bundle_plan_store.get_transaction(plan_id).await.unwrap().unwrap();
        assert!(tx.posted_at.is_some());
        assert!(deps.job_queue.claim(QueueName::Seeder).await.unwrap().is_some());
        assert!(deps.job_queue.claim(QueueName::Verifier).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reposting_an_already_posted_plan_is_a_no_op() {
        let deps = fake_deps();
        let plan_id = seeded_plan(&deps).await;
        handle(&deps, &job_for(plan_id)).await.unwrap();
        handle(&deps, &job_for(plan_id)).await.unwrap();
        assert!(deps.job_queue.claim(QueueName::Seeder).await.unwrap().is_some());
        assert!(deps.job_queue.claim(QueueName::Seeder).await.unwrap().is_none(), "second post must not re-enqueue seed");
    }

    #[tokio::test]
    async fn empty_wallet_requeues_items_to_new() {
        struct FailingSubmitGateway(crate::gateway_client::FakeChainGateway);

        #[async_trait::async_trait]
        impl crate::gateway_client::ChainGateway for FailingSubmitGateway {
            async fn submit_transaction(&self, p: &[u8], t: &gateway_common::tags::TagList, s: &str) -> Result<String, crate::gateway_client::ChainGatewayError> {
                let _ = (p, t, s);
                Err(crate::gateway_client::ChainGatewayError::Rejected("no funds".into()))
            }
            async fn seed_chunks(&self, tx_id: &str, payload: &[u8]) -> Result<(), crate::gateway_client::ChainGatewayError> {
                self.0.seed_chunks(tx_id, payload).await
            }
            async fn current_height(&self) -> Result<u64, crate::gateway_client::ChainGatewayError> {
                self.0.current_height().await
            }
            async fn transaction_status(&self, tx_id: &str) -> Result<crate::gateway_client::ChainTxStatus, crate::gateway_client::ChainGatewayError> {
                self.0.transaction_status(tx_id).await
            }
            async fn items_indexed(&self, tx_id: &str, ids: &[String]) -> Result<Vec<bool>, crate::gateway_client::ChainGatewayError> {
                self.0.items_indexed(tx_id, ids).await
            }
            async fn wallet_balance(&self) -> Result<u128, crate::gateway_client::ChainGatewayError> {
                Ok(0)
            }
            async fn storage_price_per_10_gib(&self) -> Result<u128, crate::gateway_client::ChainGatewayError> {
                self.0.storage_price_per_10_gib().await
            }
        }

        let mut deps = fake_deps();
        let item_id = ContentId::from_signature(b"requeue-me");
        deps.item_store
            .insert_batch(vec![DataItem::new(item_id, "alice", 10, gateway_common::money::Credits(1), &gateway_common::tags::TagList::default(), 1_000, None)])
            .await
            .unwrap();
        let plan = BundlePlan::new(vec![item_id], 0, None, "bundling-gateway".to_string());
        deps.bundle_plan_store.insert_plan(plan.clone()).await.unwrap();
        deps.triple_store.cold.put_keyed("plan_payload", &plan.id.to_string(), b"payload").await.unwrap();
        deps.triple_store
            .cold
            .put_keyed("plan_tags", &plan.id.to_string(), &serde_json::to_vec(&gateway_common::tags::TagList::default()).unwrap())
            .await
            .unwrap();
        deps.bundle_plan_store
            .insert_transaction_if_absent(BundleTransaction {
                plan_id: plan.id,
                tx_id: "precomputed-tx".to_string(),
                payload_size: 7,
                reward: None,
                native_token_usd_rate: None,
                posted_at: None,
                posted_at_height: None,
            })
            .await
            .unwrap();
        deps.chain_gateway = std::sync::Arc::new(FailingSubmitGateway(crate::gateway_client::FakeChainGateway::new()));

        handle(&deps, &job_for(plan.id)).await.unwrap();

        let item = deps.item_store.get(item_id).await.unwrap().unwrap();
        assert_eq!(item.status, crate::items::ItemStatus::New);
        assert_eq!(deps.bundle_plan_store.get_plan(plan.id).await.unwrap().unwrap().status, PlanStatus::Dropped);
    }
}
