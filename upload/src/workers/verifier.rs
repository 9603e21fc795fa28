//! §4.8 "verifier": polls chain confirmations for a posted bundle. At
//! [`BUNDLE_VERIFY_CONFIRMATIONS`] it cross-checks every planned item is indexed
//! and marks the bundle + its items permanent; if [`BUNDLE_DROP_BLOCKS`] elapse
//! first with no confirmation, the bundle is dropped and its items requeued.

use futures::stream::{self, StreamExt};
use gateway_common::config::{BUNDLE_DROP_BLOCKS, BUNDLE_VERIFY_CONFIRMATIONS};
use uuid::Uuid;

use crate::bundle_plan::PlanStatus;
use crate::deps::Deps;
use crate::gateway_client::ChainTxStatus;
use crate::queue::{Job, QueueName};

const ITEMS_INDEXED_BATCH_SIZE: usize = 100;
const ITEMS_INDEXED_CONCURRENCY: usize = 10;

pub async fn handle(deps: &Deps, job: &Job) -> anyhow::Result<()> {
    let plan_id = super::plan_id_from_payload(job)?;
    verify_plan(deps, plan_id).await
}

async fn verify_plan(deps: &Deps, plan_id: Uuid) -> anyhow::Result<()> {
    let plan = deps.bundle_plan_store.get_plan(plan_id).await?.ok_or_else(|| anyhow::anyhow!("plan {plan_id} not found"))?;
    if plan.status == PlanStatus::Permanent || plan.status == PlanStatus::Dropped {
        return Ok(());
    }

    let tx = deps.bundle_plan_store.get_transaction(plan_id).await?.ok_or_else(|| anyhow::anyhow!("plan {plan_id} has no transaction"))?;
    let posted_at_height = tx
        .posted_at_height
        .ok_or_else(|| anyhow::anyhow!("plan {plan_id} transaction is not yet posted"))?;

    match deps.chain_gateway.transaction_status(&tx.tx_id).await? {
        ChainTxStatus::Confirmations(n) if n >= BUNDLE_VERIFY_CONFIRMATIONS => {
            let ids: Vec<String> = plan.item_ids.iter().map(|id| id.to_base64url()).collect();
            let all_indexed = are_all_indexed(deps, &tx.tx_id, &ids).await?;
            if !all_indexed {
                // confirmed on-chain but not yet queryable; retry this job later.
                anyhow::bail!("plan {plan_id} confirmed at {n} blocks but not all items are indexed yet");
            }

            deps.item_store.mark_permanent(&plan.item_ids).await?;
            for id in &plan.item_ids {
                if let Err(err) = deps.triple_store.sweep_warm(*id).await {
                    log::warn!("warm sweep for {id} failed (best-effort, ignored): {err}");
                }
            }
            deps.bundle_plan_store.set_status(plan.id, PlanStatus::Permanent).await?;
            Ok(())
        }
        ChainTxStatus::NotFound | ChainTxStatus::Pending | ChainTxStatus::Confirmations(_) => {
            let current_height = deps.chain_gateway.current_height().await?;
            let elapsed_blocks = current_height.saturating_sub(posted_at_height);
            if elapsed_blocks >= BUNDLE_DROP_BLOCKS {
                log::warn!("plan {plan_id} tx {} not confirmed after {BUNDLE_DROP_BLOCKS} blocks, dropping", tx.tx_id);
                deps.item_store.requeue(&plan.item_ids, &tx.tx_id, current_height + deps.deadline_blocks_ahead).await?;
                deps.bundle_plan_store.set_status(plan.id, PlanStatus::Dropped).await?;
                Ok(())
            } else {
                anyhow::bail!("plan {plan_id} tx {} not yet confirmed, retrying", tx.tx_id)
            }
        }
    }
}

async fn are_all_indexed(deps: &Deps, tx_id: &str, ids: &[String]) -> anyhow::Result<bool> {
    let results: Vec<bool> = stream::iter(ids.chunks(ITEMS_INDEXED_BATCH_SIZE))
        .map(|batch| async move { deps.chain_gateway.items_indexed(tx_id, batch).await })
        .buffer_unordered(ITEMS_INDEXED_CONCURRENCY)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<Vec<bool>>, _>>()?
        .into_iter()
        .flatten()
        .collect();
    Ok(results.iter().all(|indexed| *indexed))
}

#[cfg(test)]
mod tests {
    use gateway_common::ContentId;

    use super::*;
    use crate::bundle_plan::{BundlePlan, BundleTransaction};
    use crate::deps::test_support::fake_deps;
    use crate::items::{DataItem, ItemStore};
    use crate::queue::JobStatus;

    fn job_for(plan_id: Uuid) -> Job {
        Job {
            id: Uuid::new_v4(),
            queue: QueueName::Verifier,
            payload: serde_json::json!({ "plan_id": plan_id.to_string() }),
            attempt: 0,
            status: JobStatus::Running,
            available_at: chrono::Utc::now(),
            created_at: chrono::Utc::now(),
            last_error: None,
        }
    }

    #[tokio::test]
    async fn confirmed_and_indexed_plan_becomes_permanent() {
        let deps = fake_deps();
        let item_id = ContentId::from_signature(b"verified-item");
        deps.item_store
            .insert_batch(vec![DataItem::new(item_id, "alice", 10, gateway_common::money::Credits(1), &gateway_common::tags::TagList::default(), 1_000, None)])
            .await
            .unwrap();
        let plan = BundlePlan::new(vec![item_id], 0, None, "bundling-gateway".to_string());
        deps.bundle_plan_store.insert_plan(plan.clone()).await.unwrap();
        deps.bundle_plan_store
            .insert_transaction_if_absent(BundleTransaction {
                plan_id: plan.id,
                tx_id: "tx-confirmed".to_string(),
                payload_size: 10,
                reward: None,
                native_token_usd_rate: None,
                posted_at: Some(chrono::Utc::now()),
                posted_at_height: None,
            })
            .await
            .unwrap();

        handle(&deps, &job_for(plan.id)).await.unwrap();

        assert_eq!(deps.bundle_plan_store.get_plan(plan.id).await.unwrap().unwrap().status, PlanStatus::Permanent);
        assert_eq!(deps.item_store.get(item_id).await.unwrap().unwrap().status, crate::items::ItemStatus::Permanent);
    }

    #[tokio::test]
    async fn unposted_transaction_is_an_error() {
        let deps = fake_deps();
        let plan = BundlePlan::new(vec![], 0, None, "bundling-gateway".to_string());
        deps.bundle_plan_store.insert_plan(plan.clone()).await.unwrap();
        deps.bundle_plan_store
            .insert_transaction_if_absent(BundleTransaction {
                plan_id: plan.id,
                tx_id: "tx-unposted".to_string(),
                payload_size: 0,
                reward: None,
                native_token_usd_rate: None,
                posted_at: None,
                posted_at_height: None,
            })
            .await
            .unwrap();

        assert!(handle(&deps, &job_for(plan.id)).await.is_err());
    }
}
