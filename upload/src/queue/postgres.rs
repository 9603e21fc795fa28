//! Postgres-backed [`super::JobQueue`]: a row-locked job table, claimed with
//! `FOR UPDATE SKIP LOCKED` so concurrent workers (and concurrent nodes, per §4.7
//! "jobs are globally locked by the fabric") never double-claim the same row.

use async_trait::async_trait;
use chrono::Utc;
use gateway_common::config::QUEUE_MAX_ATTEMPTS;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{retry_delay, Job, JobQueue, JobStatus, QueueError, QueueName};

pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_err(err: sqlx::Error) -> QueueError {
        QueueError::Store(err.into())
    }
}

fn parse_status(s: &str) -> Result<JobStatus, QueueError> {
    Ok(match s {
        "queued" => JobStatus::Queued,
        "running" => JobStatus::Running,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        other => return Err(anyhow::anyhow!("unknown job status {other}").into()),
    })
}

fn row_to_job(row: sqlx::postgres::PgRow) -> Result<Job, QueueError> {
    let queue: String = row.try_get("queue").map_err(PgJobQueue::map_err)?;
    let status: String = row.try_get("status").map_err(PgJobQueue::map_err)?;
    Ok(Job {
        id: row.try_get("id").map_err(PgJobQueue::map_err)?,
        queue: queue.parse().map_err(|_| anyhow::anyhow!("unknown queue name {queue}"))?,
        payload: row.try_get("payload").map_err(PgJobQueue::map_err)?,
        attempt: row.try_get::<i32, _>("attempt").map_err(PgJobQueue::map_err)? as u32,
        status: parse_status(&status)?,
        available_at: row.try_get("available_at").map_err(PgJobQueue::map_err)?,
        created_at: row.try_get("created_at").map_err(PgJobQueue::map_err)?,
        last_error: row.try_get("last_error").map_err(PgJobQueue::map_err)?,
    })
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, queue: QueueName, payload: serde_json::Value) -> Result<Uuid, QueueError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO jobs (id, queue, payload, attempt, status, available_at, created_at, last_error) \
             VALUES ($1, $2, $3, 0, 'queued', $4, $4, NULL)",
        )
        .bind(id)
        .bind(queue.to_string())
        .bind(&payload)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;
        Ok(id)
    }

    async fn claim(&self, queue: QueueName) -> Result<Option<Job>, QueueError> {
        let mut tx = self.pool.begin().await.map_err(Self::map_err)?;
        let row = sqlx::query(
            "SELECT id, queue, payload, attempt, status, available_at, created_at, last_error FROM jobs \
             WHERE queue = $1 AND status = 'queued' AND available_at <= now() \
             ORDER BY created_at ASC LIMIT 1 FOR UPDATE SKIP LOCKED",
        )
        .bind(queue.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(Self::map_err)?;

        let Some(row) = row else {
            tx.commit().await.map_err(Self::map_err)?;
            return Ok(None);
        };
        let mut job = row_to_job(row)?;
        job.status = JobStatus::Running;
        job.attempt += 1;

        sqlx::query("UPDATE jobs SET status = 'running', attempt = $1 WHERE id = $2")
            .bind(job.attempt as i32)
            .bind(job.id)
            .execute(&mut *tx)
            .await
            .map_err(Self::map_err)?;
        tx.commit().await.map_err(Self::map_err)?;
        Ok(Some(job))
    }

    async fn complete(&self, job_id: Uuid) -> Result<(), QueueError> {
        sqlx::query("UPDATE jobs SET status = 'completed' WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<(), QueueError> {
        let row = sqlx::query("SELECT attempt FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::map_err)?;
        let Some(row) = row else { return Ok(()) };
        let attempt: i32 = row.try_get("attempt").map_err(Self::map_err)?;
        let attempt = attempt as u32;

        match retry_delay(attempt) {
            Some(delay) if attempt < QUEUE_MAX_ATTEMPTS => {
                let available_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
                sqlx::query("UPDATE jobs SET status = 'queued', available_at = $1, last_error = $2 WHERE id = $3")
                    .bind(available_at)
                    .bind(error)
                    .bind(job_id)
                    .execute(&self.pool)
                    .await
                    .map_err(Self::map_err)?;
            }
            _ => {
                sqlx::query("UPDATE jobs SET status = 'failed', last_error = $1 WHERE id = $2")
                    .bind(error)
                    .bind(job_id)
                    .execute(&self.pool)
                    .await
                    .map_err(Self::map_err)?;
            }
        }
        Ok(())
    }

    async fn running_count(&self, queue: QueueName) -> Result<usize, QueueError> {
        let row = sqlx::query("SELECT count(*) AS n FROM jobs WHERE queue = $1 AND status = 'running'")
            .bind(queue.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(Self::map_err)?;
        let n: i64 = row.try_get("n").map_err(Self::map_err)?;
        Ok(n as usize)
    }
}
