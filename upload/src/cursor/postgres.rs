//! Postgres-backed [`super::CursorStore`] over a single key/value `worker_cursors`
//! table, following the same base64url content-id-as-text convention as
//! `items::postgres`.

use async_trait::async_trait;
use gateway_common::ContentId;
use sqlx::{PgPool, Row};

use super::{CursorError, CursorStore};

pub struct PgCursorStore {
    pool: PgPool,
}

impl PgCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_err(err: sqlx::Error) -> CursorError {
        CursorError::Store(err.into())
    }
}

#[async_trait]
impl CursorStore for PgCursorStore {
    async fn get(&self, name: &str) -> Result<Option<ContentId>, CursorError> {
        let row = sqlx::query("SELECT content_id FROM worker_cursors WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::map_err)?;
        let Some(row) = row else { return Ok(None) };
        let content_id: String = row.try_get("content_id").map_err(Self::map_err)?;
        Ok(Some(content_id.parse().map_err(|_| anyhow::anyhow!("malformed content id in storage"))?))
    }

    async fn set(&self, name: &str, value: ContentId) -> Result<(), CursorError> {
        sqlx::query(
            "INSERT INTO worker_cursors (name, content_id, updated_at) VALUES ($1, $2, now()) \
             ON CONFLICT (name) DO UPDATE SET content_id = EXCLUDED.content_id, updated_at = now()",
        )
        .bind(name)
        .bind(value.to_base64url())
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn clear(&self, name: &str) -> Result<(), CursorError> {
        sqlx::query("DELETE FROM worker_cursors WHERE name = $1").bind(name).execute(&self.pool).await.map_err(Self::map_err)?;
        Ok(())
    }
}
