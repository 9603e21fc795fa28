//! Postgres-backed [`super::ItemStore`]. Amount columns follow the TEXT-encoded
//! base-10 `u128` convention established in `gateway-payment`'s ledger store;
//! content ids are stored as their base64url text form so they round-trip through
//! `FromStr`/`Display` without a bytea/driver type dance.

use async_trait::async_trait;
use gateway_common::money::Credits;
use gateway_common::ContentId;
use sqlx::{PgPool, Row};

use super::{DataItem, ItemError, ItemStatus, ItemStore};

pub struct PgItemStore {
    pool: PgPool,
}

impl PgItemStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_err(err: sqlx::Error) -> ItemError {
        ItemError::Store(err.into())
    }
}

fn row_to_item(row: sqlx::postgres::PgRow) -> Result<DataItem, ItemError> {
    let content_id: String = row.try_get("content_id").map_err(PgItemStore::map_err)?;
    let assessed_price: String = row.try_get("assessed_price").map_err(PgItemStore::map_err)?;
    let status: String = row.try_get("status").map_err(PgItemStore::map_err)?;
    Ok(DataItem {
        content_id: content_id.parse().map_err(|_| anyhow::anyhow!("malformed content id in storage"))?,
        owner_address: row.try_get("owner_address").map_err(PgItemStore::map_err)?,
        byte_count: row.try_get::<i64, _>("byte_count").map_err(PgItemStore::map_err)? as u64,
        assessed_price: Credits(assessed_price.parse().map_err(|e| anyhow::anyhow!("malformed assessed_price: {e}"))?),
        content_type: row.try_get("content_type").map_err(PgItemStore::map_err)?,
        premium_tag: row.try_get("premium_tag").map_err(PgItemStore::map_err)?,
        deadline_height: row.try_get::<i64, _>("deadline_height").map_err(PgItemStore::map_err)? as u64,
        failed_bundles: row.try_get("failed_bundles").map_err(PgItemStore::map_err)?,
        status: match status.as_str() {
            "new" => ItemStatus::New,
            "planned" => ItemStatus::Planned,
            "permanent" => ItemStatus::Permanent,
            "failed" => ItemStatus::Failed,
            other => return Err(anyhow::anyhow!("unknown item status {other}").into()),
        },
        plan_id: row.try_get("plan_id").map_err(PgItemStore::map_err)?,
        is_nested_bundle: row.try_get("is_nested_bundle").map_err(PgItemStore::map_err)?,
        created_at: row.try_get("created_at").map_err(PgItemStore::map_err)?,
    })
}

const SELECT_COLUMNS: &str = "content_id, owner_address, byte_count, assessed_price, content_type, \
     premium_tag, deadline_height, failed_bundles, status, plan_id, is_nested_bundle, created_at";

#[async_trait]
impl ItemStore for PgItemStore {
    async fn insert_batch(&self, items: Vec<DataItem>) -> Result<(), ItemError> {
        let mut tx = self.pool.begin().await.map_err(Self::map_err)?;
        for item in items {
            sqlx::query(
                "INSERT INTO data_items (content_id, owner_address, byte_count, assessed_price, content_type, \
                 premium_tag, deadline_height, failed_bundles, status, plan_id, is_nested_bundle, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
                 ON CONFLICT (content_id) DO NOTHING",
            )
            .bind(item.content_id.to_base64url())
            .bind(&item.owner_address)
            .bind(item.byte_count as i64)
            .bind(item.assessed_price.0.to_string())
            .bind(&item.content_type)
            .bind(&item.premium_tag)
            .bind(item.deadline_height as i64)
            .bind(&item.failed_bundles)
            .bind(item.status.to_string())
            .bind(item.plan_id)
            .bind(item.is_nested_bundle)
            .bind(item.created_at)
            .execute(&mut *tx)
            .await
            .map_err(Self::map_err)?;
        }
        tx.commit().await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn get(&self, id: ContentId) -> Result<Option<DataItem>, ItemError> {
        let row = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM data_items WHERE content_id = $1"))
            .bind(id.to_base64url())
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::map_err)?;
        row.map(row_to_item).transpose()
    }

    async fn eligible_for_planning(&self, current_height: Option<u64>, overdue_blocks: u64) -> Result<Vec<DataItem>, ItemError> {
        let rows = match current_height {
            Some(height) => {
                sqlx::query(&format!(
                    "SELECT {SELECT_COLUMNS} FROM data_items WHERE status = 'new' AND deadline_height - $1 <= $2"
                ))
                .bind(height as i64)
                .bind(overdue_blocks as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM data_items WHERE status = 'new'"))
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(Self::map_err)?;
        rows.into_iter().map(row_to_item).collect()
    }

    async fn mark_planned(&self, item_ids: &[ContentId], plan_id: uuid::Uuid) -> Result<(), ItemError> {
        let ids: Vec<String> = item_ids.iter().map(ContentId::to_base64url).collect();
        sqlx::query("UPDATE data_items SET status = 'planned', plan_id = $1 WHERE content_id = ANY($2)")
            .bind(plan_id)
            .bind(&ids)
            .execute(&self.pool)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn mark_permanent(&self, item_ids: &[ContentId]) -> Result<(), ItemError> {
        let ids: Vec<String> = item_ids.iter().map(ContentId::to_base64url).collect();
        sqlx::query("UPDATE data_items SET status = 'permanent' WHERE content_id = ANY($1)")
            .bind(&ids)
            .execute(&self.pool)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn requeue(&self, item_ids: &[ContentId], failed_bundle_tx_id: &str, new_deadline_height: u64) -> Result<(), ItemError> {
        let ids: Vec<String> = item_ids.iter().map(ContentId::to_base64url).collect();
        sqlx::query(
            "UPDATE data_items SET status = 'new', plan_id = NULL, deadline_height = $1, \
             failed_bundles = array_append(failed_bundles, $2) WHERE content_id = ANY($3)",
        )
        .bind(new_deadline_height as i64)
        .bind(failed_bundle_tx_id)
        .bind(&ids)
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn mark_failed(&self, id: ContentId, _reason: &str) -> Result<(), ItemError> {
        sqlx::query("UPDATE data_items SET status = 'failed' WHERE content_id = $1")
            .bind(id.to_base64url())
            .execute(&self.pool)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn permanent_older_than(&self, cutoff: chrono::DateTime<chrono::Utc>, after: Option<ContentId>, limit: usize) -> Result<Vec<DataItem>, ItemError> {
        let rows = match after {
            Some(cursor) => {
                sqlx::query(&format!(
                    "SELECT {SELECT_COLUMNS} FROM data_items WHERE status = 'permanent' AND created_at < $1 \
                     AND content_id > $2 ORDER BY content_id LIMIT $3"
                ))
                .bind(cutoff)
                .bind(cursor.to_base64url())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {SELECT_COLUMNS} FROM data_items WHERE status = 'permanent' AND created_at < $1 \
                     ORDER BY content_id LIMIT $2"
                ))
                .bind(cutoff)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(Self::map_err)?;
        rows.into_iter().map(row_to_item).collect()
    }
}
