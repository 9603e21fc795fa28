//! Postgres-backed [`super::MultipartSessionStore`].

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{MultipartError, MultipartSession, MultipartSessionStore, SessionStatus};

pub struct PgMultipartSessionStore {
    pool: PgPool,
}

impl PgMultipartSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_err(err: sqlx::Error) -> MultipartError {
        MultipartError::Store(err.into())
    }
}

fn parse_status(s: &str) -> Result<SessionStatus, MultipartError> {
    Ok(match s {
        "in_progress" => SessionStatus::InProgress,
        "finalized" => SessionStatus::Finalized,
        "aborted" => SessionStatus::Aborted,
        other => return Err(anyhow::anyhow!("unknown session status {other}").into()),
    })
}

#[async_trait]
impl MultipartSessionStore for PgMultipartSessionStore {
    async fn insert(&self, session: MultipartSession) -> Result<(), MultipartError> {
        let offsets: Vec<i64> = session.uploaded_chunk_offsets.iter().map(|&o| o as i64).collect();
        sqlx::query(
            "INSERT INTO multipart_sessions (id, owner_address, declared_total_size, chunk_size, \
             uploaded_chunk_offsets, status, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(session.id)
        .bind(&session.owner_address)
        .bind(session.declared_total_size as i64)
        .bind(session.chunk_size as i64)
        .bind(&offsets)
        .bind(session.status.to_string())
        .bind(session.created_at)
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<MultipartSession>, MultipartError> {
        let row = sqlx::query(
            "SELECT id, owner_address, declared_total_size, chunk_size, uploaded_chunk_offsets, status, created_at \
             FROM multipart_sessions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::map_err)?;
        let Some(row) = row else { return Ok(None) };
        let offsets: Vec<i64> = row.try_get("uploaded_chunk_offsets").map_err(Self::map_err)?;
        let status: String = row.try_get("status").map_err(Self::map_err)?;
        Ok(Some(MultipartSession {
            id: row.try_get("id").map_err(Self::map_err)?,
            owner_address: row.try_get("owner_address").map_err(Self::map_err)?,
            declared_total_size: row.try_get::<i64, _>("declared_total_size").map_err(Self::map_err)? as u64,
            chunk_size: row.try_get::<i64, _>("chunk_size").map_err(Self::map_err)? as u64,
            uploaded_chunk_offsets: offsets.into_iter().map(|o| o as u64).collect(),
            status: parse_status(&status)?,
            created_at: row.try_get("created_at").map_err(Self::map_err)?,
        }))
    }

    async fn record_chunk(&self, id: Uuid, offset: u64) -> Result<(), MultipartError> {
        sqlx::query(
            "UPDATE multipart_sessions SET uploaded_chunk_offsets = array_append(uploaded_chunk_offsets, $1) \
             WHERE id = $2 AND status = 'in_progress' AND NOT ($1 = ANY(uploaded_chunk_offsets))",
        )
        .bind(offset as i64)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: SessionStatus) -> Result<(), MultipartError> {
        sqlx::query("UPDATE multipart_sessions SET status = $1 WHERE id = $2")
            .bind(status.to_string())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }
}
