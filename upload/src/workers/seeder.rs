//! §4.8 "seeder": streams the posted bundle payload to the chain's chunk API,
//! bounded by [`gateway_common::config::SEED_STAGE_DEADLINE_SECONDS`], then hands
//! off to `verifier` (already enqueued by `poster` alongside this job, so seeding
//! and verifying a bundle proceed concurrently rather than one waiting on the other).

use std::time::Duration;

use gateway_common::config::SEED_STAGE_DEADLINE_SECONDS;
use uuid::Uuid;

use crate::deps::Deps;
use crate::queue::Job;

pub async fn handle(deps: &Deps, job: &Job) -> anyhow::Result<()> {
    let plan_id = super::plan_id_from_payload(job)?;
    seed_plan(deps, plan_id).await
}

async fn seed_plan(deps: &Deps, plan_id: Uuid) -> anyhow::Result<()> {
    let tx = deps
        .bundle_plan_store
        .get_transaction(plan_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("plan {plan_id} has no prepared transaction"))?;
    let payload = deps
        .triple_store
        .cold
        .get_keyed("plan_payload", &plan_id.to_string())
        .await?
        .ok_or_else(|| anyhow::anyhow!("plan {plan_id} payload missing from cold store"))?;

    tokio::time::timeout(Duration::from_secs(SEED_STAGE_DEADLINE_SECONDS), deps.chain_gateway.seed_chunks(&tx.tx_id, &payload))
        .await
        .map_err(|_| anyhow::anyhow!("seeding plan {plan_id} exceeded its deadline"))??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::bundle_plan::{BundlePlan, BundleTransaction};
    use crate::deps::test_support::fake_deps;
    use crate::queue::{JobStatus, QueueName};

    fn job_for(plan_id: Uuid) -> Job {
        Job {
            id: Uuid::new_v4(),
            queue: QueueName::Seeder,
            payload: serde_json::json!({ "plan_id": plan_id.to_string() }),
            attempt: 0,
            status: JobStatus::Running,
            available_at: chrono::Utc::now(),
            created_at: chrono::Utc::now(),
            last_error: None,
        }
    }

    #[tokio::test]
    async fn seeds_a_posted_plans_payload() {
        let deps = fake_deps();
        let plan = BundlePlan::new(vec![], 0, None, "bundling-gateway".to_string());
        deps.bundle_plan_store.insert_plan(plan.clone()).await.unwrap();
        deps.triple_store.cold.put_keyed("plan_payload", &plan.id.to_string(), b"bundle bytes").await.unwrap();
        deps.bundle_plan_store
            .insert_transaction_if_absent(BundleTransaction {
                plan_id: plan.id,
                tx_id: "tx-1".to_string(),
                payload_size: 12,
                reward: None,
                native_token_usd_rate: None,
                posted_at: Some(chrono::Utc::now()),
                posted_at_height: None,
            })
            .await
            .unwrap();

        handle(&deps, &job_for(plan.id)).await.unwrap();
    }

    #[tokio::test]
    async fn missing_payload_is_an_error() {
        let deps = fake_deps();
        let plan = BundlePlan::new(vec![], 0, None, "bundling-gateway".to_string());
        deps.bundle_plan_store.insert_plan(plan.clone()).await.unwrap();
        deps.bundle_plan_store
            .insert_transaction_if_absent(BundleTransaction {
                plan_id: plan.id,
                tx_id: "tx-1".to_string(),
                payload_size: 0,
                reward: None,
                native_token_usd_rate: None,
                posted_at: Some(chrono::Utc::now()),
                posted_at_height: None,
            })
            .await
            .unwrap();

        assert!(handle(&deps, &job_for(plan.id)).await.is_err());
    }
}
