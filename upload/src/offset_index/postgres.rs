//! Postgres-backed [`super::OffsetIndexStore`] against a table partitioned by
//! `created_at` date (§6 "Offset table partitioned monthly"). Partition management
//! itself is a schema-migration/DBA concern outside this module; the store only
//! issues the upsert/lookup queries.

use async_trait::async_trait;
use gateway_common::ContentId;
use sqlx::{PgPool, Row};

use super::{OffsetIndexError, OffsetIndexStore, OffsetRecord};

pub struct PgOffsetIndexStore {
    pool: PgPool,
}

impl PgOffsetIndexStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_err(err: sqlx::Error) -> OffsetIndexError {
        OffsetIndexError::Store(err.into())
    }
}

#[async_trait]
impl OffsetIndexStore for PgOffsetIndexStore {
    async fn upsert_batch(&self, records: Vec<OffsetRecord>) -> Result<(), OffsetIndexError> {
        let mut tx = self.pool.begin().await.map_err(Self::map_err)?;
        for record in records {
            sqlx::query(
                "INSERT INTO offset_index (item_id, root_bundle_id, start_offset_in_bundle, raw_length, \
                 payload_content_type, payload_data_start, parent_data_item_id, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                 ON CONFLICT (item_id) DO UPDATE SET \
                   root_bundle_id = EXCLUDED.root_bundle_id, \
                   start_offset_in_bundle = EXCLUDED.start_offset_in_bundle, \
                   raw_length = EXCLUDED.raw_length, \
                   payload_content_type = EXCLUDED.payload_content_type, \
                   payload_data_start = EXCLUDED.payload_data_start, \
                   parent_data_item_id = EXCLUDED.parent_data_item_id",
            )
            .bind(record.item_id.to_base64url())
            .bind(&record.root_bundle_id)
            .bind(record.start_offset_in_bundle as i64)
            .bind(record.raw_length as i64)
            .bind(&record.payload_content_type)
            .bind(record.payload_data_start as i64)
            .bind(record.parent_data_item_id.map(|id| id.to_base64url()))
            .bind(record.created_at)
            .execute(&mut *tx)
            .await
            .map_err(Self::map_err)?;
        }
        tx.commit().await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn get(&self, item_id: ContentId) -> Result<Option<OffsetRecord>, OffsetIndexError> {
        let row = sqlx::query(
            "SELECT item_id, root_bundle_id, start_offset_in_bundle, raw_length, \
             payload_content_type, payload_data_start, parent_data_item_id, created_at \
             FROM offset_index WHERE item_id = $1",
        )
        .bind(item_id.to_base64url())
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::map_err)?;
        let Some(row) = row else { return Ok(None) };
        let parent: Option<String> = row.try_get("parent_data_item_id").map_err(Self::map_err)?;
        Ok(Some(OffsetRecord {
            item_id,
            root_bundle_id: row.try_get("root_bundle_id").map_err(Self::map_err)?,
            start_offset_in_bundle: row.try_get::<i64, _>("start_offset_in_bundle").map_err(Self::map_err)? as u64,
            raw_length: row.try_get::<i64, _>("raw_length").map_err(Self::map_err)? as u64,
            payload_content_type: row.try_get("payload_content_type").map_err(Self::map_err)?,
            payload_data_start: row.try_get::<i64, _>("payload_data_start").map_err(Self::map_err)? as u64,
            parent_data_item_id: parent.map(|s| s.parse()).transpose().map_err(|_| anyhow::anyhow!("malformed parent item id"))?,
            created_at: row.try_get("created_at").map_err(Self::map_err)?,
        }))
    }
}
