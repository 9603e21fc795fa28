//! Postgres-backed [`super::BundlePlanStore`]. Follows the same TEXT-amount and
//! base64url-content-id conventions as `items::postgres`.

use async_trait::async_trait;
use gateway_common::ContentId;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{BundlePlan, BundlePlanError, BundlePlanStore, BundleTransaction, PlanStatus};

pub struct PgBundlePlanStore {
    pool: PgPool,
}

impl PgBundlePlanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_err(err: sqlx::Error) -> BundlePlanError {
        BundlePlanError::Store(err.into())
    }
}

fn parse_status(s: &str) -> Result<PlanStatus, BundlePlanError> {
    Ok(match s {
        "new" => PlanStatus::New,
        "prepared" => PlanStatus::Prepared,
        "posted" => PlanStatus::Posted,
        "seeded" => PlanStatus::Seeded,
        "permanent" => PlanStatus::Permanent,
        "dropped" => PlanStatus::Dropped,
        other => return Err(anyhow::anyhow!("unknown plan status {other}").into()),
    })
}

#[async_trait]
impl BundlePlanStore for PgBundlePlanStore {
    async fn insert_plan(&self, plan: BundlePlan) -> Result<(), BundlePlanError> {
        let item_ids: Vec<String> = plan.item_ids.iter().map(ContentId::to_base64url).collect();
        sqlx::query(
            "INSERT INTO bundle_plans (id, item_ids, target_bundle_size, premium_tag, app_name, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(plan.id)
        .bind(&item_ids)
        .bind(plan.target_bundle_size as i64)
        .bind(&plan.premium_tag)
        .bind(&plan.app_name)
        .bind(plan.status.to_string())
        .bind(plan.created_at)
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn get_plan(&self, id: Uuid) -> Result<Option<BundlePlan>, BundlePlanError> {
        let row = sqlx::query(
            "SELECT id, item_ids, target_bundle_size, premium_tag, app_name, status, created_at \
             FROM bundle_plans WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::map_err)?;
        let Some(row) = row else { return Ok(None) };
        let item_ids: Vec<String> = row.try_get("item_ids").map_err(Self::map_err)?;
        let status: String = row.try_get("status").map_err(Self::map_err)?;
        Ok(Some(BundlePlan {
            id: row.try_get("id").map_err(Self::map_err)?,
            item_ids: item_ids
                .iter()
                .map(|s| s.parse().map_err(|_| anyhow::anyhow!("malformed content id in storage")))
                .collect::<Result<_, _>>()?,
            target_bundle_size: row.try_get::<i64, _>("target_bundle_size").map_err(Self::map_err)? as u64,
            premium_tag: row.try_get("premium_tag").map_err(Self::map_err)?,
            app_name: row.try_get("app_name").map_err(Self::map_err)?,
            status: parse_status(&status)?,
            created_at: row.try_get("created_at").map_err(Self::map_err)?,
        }))
    }

    async fn set_status(&self, id: Uuid, status: PlanStatus) -> Result<(), BundlePlanError> {
        sqlx::query("UPDATE bundle_plans SET status = $1 WHERE id = $2")
            .bind(status.to_string())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn insert_transaction_if_absent(&self, tx: BundleTransaction) -> Result<bool, BundlePlanError> {
        let result = sqlx::query(
            "INSERT INTO bundle_transactions (plan_id, tx_id, payload_size, reward, native_token_usd_rate, posted_at, posted_at_height) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (plan_id) DO NOTHING",
        )
        .bind(tx.plan_id)
        .bind(&tx.tx_id)
        .bind(tx.payload_size as i64)
        .bind(&tx.reward)
        .bind(&tx.native_token_usd_rate)
        .bind(tx.posted_at)
        .bind(tx.posted_at_height.map(|h| h as i64))
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_transaction(&self, plan_id: Uuid) -> Result<Option<BundleTransaction>, BundlePlanError> {
        let row = sqlx::query(
            "SELECT plan_id, tx_id, payload_size, reward, native_token_usd_rate, posted_at, posted_at_height \
             FROM bundle_transactions WHERE plan_id = $1",
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::map_err)?;
        row.map(|row| {
            let posted_at_height: Option<i64> = row.try_get("posted_at_height").map_err(Self::map_err)?;
            Ok(BundleTransaction {
                plan_id: row.try_get("plan_id").map_err(Self::map_err)?,
                tx_id: row.try_get("tx_id").map_err(Self::map_err)?,
                payload_size: row.try_get::<i64, _>("payload_size").map_err(Self::map_err)? as u64,
                reward: row.try_get("reward").map_err(Self::map_err)?,
                native_token_usd_rate: row.try_get("native_token_usd_rate").map_err(Self::map_err)?,
                posted_at: row.try_get("posted_at").map_err(Self::map_err)?,
                posted_at_height: posted_at_height.map(|h| h as u64),
            })
        })
        .transpose()
    }

    async fn set_transaction_posted(&self, plan_id: Uuid, native_token_usd_rate: String, posted_at_height: u64) -> Result<(), BundlePlanError> {
        sqlx::query(
            "UPDATE bundle_transactions SET posted_at = now(), native_token_usd_rate = $1, posted_at_height = $2 WHERE plan_id = $3",
        )
        .bind(native_token_usd_rate)
        .bind(posted_at_height as i64)
        .bind(plan_id)
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }
}
