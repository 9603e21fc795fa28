//! §4.7 "Queue Fabric": a durable queue per stage, concurrency-capped, with
//! exponential-backoff retry and bounded retention. Modeled as one logical
//! interface (§9 design note "three Redis-like roles -> three logical interfaces",
//! this being the durable-queue role) so the in-memory test double and the
//! Postgres-backed production queue are interchangeable to every worker.
//!
//! Cross-node semantics (§4.7 "jobs are globally locked by the fabric") come from
//! [`JobQueue::claim`] being atomic-claim-or-nothing: two nodes racing to claim the
//! same job never both succeed, which is what makes the planner a de facto global
//! singleton without any separate leader-election mechanism.

pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gateway_common::config::{QUEUE_MAX_ATTEMPTS, QUEUE_RETRY_DELAYS_SECONDS};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum QueueName {
    NewDataItem,
    Planner,
    Preparer,
    Poster,
    Seeder,
    Verifier,
    PutOffsets,
    OpticalPost,
    UnbundleNested,
    FinalizeMultipart,
    CleanupWarm,
}

impl QueueName {
    /// §4.7 per-stage concurrency cap (per node).
    pub fn concurrency_cap(self) -> usize {
        use gateway_common::config::queue_concurrency::*;
        match self {
            QueueName::NewDataItem => NEW_DATA_ITEM,
            QueueName::Planner => PLANNER,
            QueueName::Preparer => PREPARER,
            QueueName::Poster => POSTER,
            QueueName::Seeder => SEEDER,
            QueueName::Verifier => VERIFIER,
            QueueName::PutOffsets => PUT_OFFSETS,
            QueueName::OpticalPost => OPTICAL_POST,
            QueueName::UnbundleNested => UNBUNDLE_NESTED,
            QueueName::FinalizeMultipart => FINALIZE_MULTIPART,
            QueueName::CleanupWarm => CLEANUP_WARM,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

/// One unit of work on a queue. `payload` is a JSON blob the stage handler
/// deserializes into its own input type — kept opaque here so the fabric doesn't
/// need to know eleven different input shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub queue: QueueName,
    pub payload: serde_json::Value,
    pub attempt: u32,
    pub status: JobStatus,
    pub available_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Backoff delay before attempt number `attempt` (1-indexed) is retried (§4.7
/// "exponential backoff, 3 attempts (~5s / 25s / 125s), then move to failed").
pub fn retry_delay(attempt: u32) -> Option<Duration> {
    let idx = (attempt.saturating_sub(1)) as usize;
    QUEUE_RETRY_DELAYS_SECONDS.get(idx).map(|secs| Duration::from_secs(*secs))
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, queue: QueueName, payload: serde_json::Value) -> Result<Uuid, QueueError>;

    /// Atomically claims at most one available job on `queue` whose `available_at`
    /// has passed, transitioning it to `Running`. Returns `None` when nothing is
    /// ready. Idempotent-keyed handlers (§4.7) make a re-claim after a crash safe.
    async fn claim(&self, queue: QueueName) -> Result<Option<Job>, QueueError>;

    async fn complete(&self, job_id: Uuid) -> Result<(), QueueError>;

    /// Marks a claimed job failed: if `attempt < QUEUE_MAX_ATTEMPTS` it is
    /// rescheduled after [`retry_delay`], otherwise moved to `Failed` terminally.
    async fn fail(&self, job_id: Uuid, error: &str) -> Result<(), QueueError>;

    /// Count of jobs currently `Running` on `queue`, for concurrency-cap enforcement.
    async fn running_count(&self, queue: QueueName) -> Result<usize, QueueError>;
}

pub struct InMemoryJobQueue {
    jobs: std::sync::Mutex<std::collections::HashMap<Uuid, Job>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self { jobs: Default::default() }
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, queue: QueueName, payload: serde_json::Value) -> Result<Uuid, QueueError> {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            queue,
            payload,
            attempt: 0,
            status: JobStatus::Queued,
            available_at: now,
            created_at: now,
            last_error: None,
        };
        let id = job.id;
        self.jobs.lock().unwrap().insert(id, job);
        Ok(id)
    }

    async fn claim(&self, queue: QueueName) -> Result<Option<Job>, QueueError> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().unwrap();
        let candidate = jobs
            .values_mut()
            .filter(|j| j.queue == queue && j.status == JobStatus::Queued && j.available_at <= now)
            .min_by_key(|j| j.created_at);
        if let Some(job) = candidate {
            job.status = JobStatus::Running;
            job.attempt += 1;
            Ok(Some(job.clone()))
        } else {
            Ok(None)
        }
    }

    async fn complete(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&job_id) {
            job.status = JobStatus::Completed;
        }
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<(), QueueError> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&job_id) {
            job.last_error = Some(error.to_string());
            match retry_delay(job.attempt) {
                Some(delay) if job.attempt < QUEUE_MAX_ATTEMPTS => {
                    job.status = JobStatus::Queued;
                    job.available_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
                }
                _ => job.status = JobStatus::Failed,
            }
        }
        Ok(())
    }

    async fn running_count(&self, queue: QueueName) -> Result<usize, QueueError> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs.values().filter(|j| j.queue == queue && j.status == JobStatus::Running).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn third_failure_moves_the_job_to_failed_terminally() {
        let queue = InMemoryJobQueue::new();
        let id = queue.enqueue(QueueName::Preparer, serde_json::json!({})).await.unwrap();

        for _ in 0..QUEUE_MAX_ATTEMPTS {
            let job = queue.claim(QueueName::Preparer).await.unwrap().unwrap();
            assert_eq!(job.id, id);
            queue.fail(id, "boom").await.unwrap();
        }

        let jobs = queue.jobs.lock().unwrap();
        assert_eq!(jobs.get(&id).unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn a_job_not_yet_available_is_not_claimable() {
        let queue = InMemoryJobQueue::new();
        let id = queue.enqueue(QueueName::Planner, serde_json::json!({})).await.unwrap();
        queue.claim(QueueName::Planner).await.unwrap();
        queue.fail(id, "transient").await.unwrap();
        assert!(queue.claim(QueueName::Planner).await.unwrap().is_none());
    }
}
