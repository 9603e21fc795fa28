//! §3 "Bundle plan" / "Bundle transaction": a plan groups item ids selected by the
//! planner (§4.8); once prepared, a bundle transaction row records the chain tx id,
//! sizes, and post timestamp. A plan's item set is immutable once prepared — items
//! leave only via the drop-and-requeue path (§3 invariant).

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gateway_common::ContentId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BundlePlanError {
    #[error("bundle plan {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PlanStatus {
    New,
    Prepared,
    Posted,
    Seeded,
    Permanent,
    Dropped,
}

/// §3 "Bundle plan". `app_name` carries the segregated premium-tag app name when
/// this plan was split out by §4.8 planner "Segregation", else the default app name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundlePlan {
    pub id: Uuid,
    pub item_ids: Vec<ContentId>,
    pub target_bundle_size: u64,
    pub premium_tag: Option<String>,
    pub app_name: String,
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
}

impl BundlePlan {
    pub fn new(item_ids: Vec<ContentId>, target_bundle_size: u64, premium_tag: Option<String>, app_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_ids,
            target_bundle_size,
            premium_tag,
            app_name: app_name.into(),
            status: PlanStatus::New,
            created_at: Utc::now(),
        }
    }
}

/// §3 "Bundle transaction": created at prepare, terminal at verify.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleTransaction {
    pub plan_id: Uuid,
    pub tx_id: String,
    pub payload_size: u64,
    pub reward: Option<String>,
    pub native_token_usd_rate: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    /// Chain height observed at post time, used by `workers::verifier` to measure
    /// the §4.8 "`BUNDLE_DROP_BLOCKS` elapsed without confirmation" window in
    /// blocks rather than wall-clock time.
    pub posted_at_height: Option<u64>,
}

#[async_trait]
pub trait BundlePlanStore: Send + Sync {
    async fn insert_plan(&self, plan: BundlePlan) -> Result<(), BundlePlanError>;
    async fn get_plan(&self, id: Uuid) -> Result<Option<BundlePlan>, BundlePlanError>;
    async fn set_status(&self, id: Uuid, status: PlanStatus) -> Result<(), BundlePlanError>;
    /// Prepare writes the bundle transaction row. Racing double-prepare is a no-op
    /// (§4.8 preparer: "If persistence races with an already-prepared plan: no-op").
    async fn insert_transaction_if_absent(&self, tx: BundleTransaction) -> Result<bool, BundlePlanError>;
    async fn get_transaction(&self, plan_id: Uuid) -> Result<Option<BundleTransaction>, BundlePlanError>;
    async fn set_transaction_posted(&self, plan_id: Uuid, native_token_usd_rate: String, posted_at_height: u64) -> Result<(), BundlePlanError>;
}

pub struct InMemoryBundlePlanStore {
    plans: std::sync::Mutex<std::collections::HashMap<Uuid, BundlePlan>>,
    transactions: std::sync::Mutex<std::collections::HashMap<Uuid, BundleTransaction>>,
}

impl InMemoryBundlePlanStore {
    pub fn new() -> Self {
        Self { plans: Default::default(), transactions: Default::default() }
    }
}

impl Default for InMemoryBundlePlanStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BundlePlanStore for InMemoryBundlePlanStore {
    async fn insert_plan(&self, plan: BundlePlan) -> Result<(), BundlePlanError> {
        self.plans.lock().unwrap().insert(plan.id, plan);
        Ok(())
    }

    async fn get_plan(&self, id: Uuid) -> Result<Option<BundlePlan>, BundlePlanError> {
        Ok(self.plans.lock().unwrap().get(&id).cloned())
    }

    async fn set_status(&self, id: Uuid, status: PlanStatus) -> Result<(), BundlePlanError> {
        let mut plans = self.plans.lock().unwrap();
        let plan = plans.get_mut(&id).ok_or(BundlePlanError::NotFound(id))?;
        plan.status = status;
        Ok(())
    }

    async fn insert_transaction_if_absent(&self, tx: BundleTransaction) -> Result<bool, BundlePlanError> {
        let mut transactions = self.transactions.lock().unwrap();
        if transactions.contains_key(&tx.plan_id) {
            return Ok(false);
        }
        transactions.insert(tx.plan_id, tx);
        Ok(true)
    }

    async fn get_transaction(&self, plan_id: Uuid) -> Result<Option<BundleTransaction>, BundlePlanError> {
        Ok(self.transactions.lock().unwrap().get(&plan_id).cloned())
    }

    async fn set_transaction_posted(&self, plan_id: Uuid, native_token_usd_rate: String, posted_at_height: u64) -> Result<(), BundlePlanError> {
        let mut transactions = self.transactions.lock().unwrap();
        let tx = transactions.get_mut(&plan_id).ok_or(BundlePlanError::NotFound(plan_id))?;
        tx.posted_at = Some(Utc::now());
        tx.native_token_usd_rate = Some(native_token_usd_rate);
        tx.posted_at_height = Some(posted_at_height);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn double_prepare_of_the_same_plan_is_a_no_op() {
        let store = InMemoryBundlePlanStore::new();
        let plan_id = Uuid::new_v4();
        let tx = BundleTransaction {
            plan_id,
            tx_id: "tx-1".into(),
            payload_size: 100,
            reward: None,
            native_token_usd_rate: None,
            posted_at: None,
            posted_at_height: None,
        };
        assert!(store.insert_transaction_if_absent(tx.clone()).await.unwrap());
        let mut second = tx;
        second.tx_id = "tx-2".into();
        assert!(!store.insert_transaction_if_absent(second).await.unwrap());
        assert_eq!(store.get_transaction(plan_id).await.unwrap().unwrap().tx_id, "tx-1");
    }
}
