//! Postgres-backed [`NameSystemPurchaseStore`] (production).

use async_trait::async_trait;
use gateway_common::money::Credits;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{NameSystemError, NameSystemPurchase, NameSystemPurchaseStore, PurchaseStatus};

pub struct PgNameSystemPurchaseStore {
    pool: PgPool,
}

impl PgNameSystemPurchaseStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_err(err: sqlx::Error) -> NameSystemError {
        NameSystemError::Store(err.into())
    }
}

fn row_to_purchase(row: sqlx::postgres::PgRow) -> Result<NameSystemPurchase, NameSystemError> {
    let cost_native_atomic: String = row.try_get("cost_native_atomic").map_err(PgNameSystemPurchaseStore::map_err)?;
    let cost_credits: String = row.try_get("cost_credits").map_err(PgNameSystemPurchaseStore::map_err)?;
    let status: String = row.try_get("status").map_err(PgNameSystemPurchaseStore::map_err)?;
    Ok(NameSystemPurchase {
        nonce: row.try_get("nonce").map_err(PgNameSystemPurchaseStore::map_err)?,
        intent: row.try_get("intent").map_err(PgNameSystemPurchaseStore::map_err)?,
        name: row.try_get("name").map_err(PgNameSystemPurchaseStore::map_err)?,
        cost_native_atomic: cost_native_atomic
            .parse()
            .map_err(|e| NameSystemError::Store(anyhow::anyhow!("corrupt cost_native_atomic: {e}")))?,
        cost_credits: Credits(
            cost_credits
                .parse()
                .map_err(|e| NameSystemError::Store(anyhow::anyhow!("corrupt cost_credits: {e}")))?,
        ),
        result_id: row.try_get("result_id").map_err(PgNameSystemPurchaseStore::map_err)?,
        status: match status.as_str() {
            "pending" => PurchaseStatus::Pending,
            "success" => PurchaseStatus::Success,
            "failed" => PurchaseStatus::Failed,
            other => return Err(NameSystemError::Store(anyhow::anyhow!("corrupt status column {other:?}"))),
        },
        created_at: row.try_get("created_at").map_err(PgNameSystemPurchaseStore::map_err)?,
    })
}

#[async_trait]
impl NameSystemPurchaseStore for PgNameSystemPurchaseStore {
    async fn insert(&self, purchase: NameSystemPurchase) -> Result<(), NameSystemError> {
        sqlx::query(
            r#"
            INSERT INTO name_system_purchases
                (nonce, intent, name, cost_native_atomic, cost_credits, result_id, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(purchase.nonce)
        .bind(&purchase.intent)
        .bind(&purchase.name)
        .bind(purchase.cost_native_atomic.to_string())
        .bind(purchase.cost_credits.0.to_string())
        .bind(&purchase.result_id)
        .bind(purchase.status.to_string())
        .bind(purchase.created_at)
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn get(&self, nonce: Uuid) -> Result<Option<NameSystemPurchase>, NameSystemError> {
        let row = sqlx::query("SELECT * FROM name_system_purchases WHERE nonce = $1")
            .bind(nonce)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::map_err)?;
        row.map(row_to_purchase).transpose()
    }

    async fn update(&self, purchase: NameSystemPurchase) -> Result<(), NameSystemError> {
        sqlx::query(
            r#"
            UPDATE name_system_purchases
            SET result_id = $2, status = $3
            WHERE nonce = $1
            "#,
        )
        .bind(purchase.nonce)
        .bind(&purchase.result_id)
        .bind(purchase.status.to_string())
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }
}
