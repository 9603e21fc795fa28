//! §4.8 "cleanup-warm (scheduled daily)": scans permanent items older than
//! [`WARM_SWEEP_AFTER_PERMANENT_SECONDS`] and removes their warm-store copies in
//! batches, since cold already holds the durable copy and warm exists only to
//! speed up reads shortly after ingest. Progress is paged by content-id cursor
//! (§4.8 "cursor persisted in a config row") so a restart mid-sweep resumes
//! instead of rescanning everything already swept that day.

use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use gateway_common::config::{
    CLEANUP_WARM_BATCH_SIZE, CLEANUP_WARM_CONCURRENCY, CLEANUP_WARM_HEARTBEAT_SECONDS, CLEANUP_WARM_MAX_CONSECUTIVE_ERRORS,
    CLEANUP_WARM_SCHEDULE_INTERVAL_SECONDS, WARM_SWEEP_AFTER_PERMANENT_SECONDS,
};
use gateway_common::ContentId;
use std::sync::Arc;

use crate::deps::Deps;
use crate::queue::{Job, QueueName};

const CURSOR_NAME: &str = "cleanup_warm";

/// Ticks once a day, enqueueing a sweep. `CleanupWarm`'s concurrency cap of 1
/// (§4.7) keeps at most one node's worker running a sweep at a time, same
/// singleton trick as the planner.
pub fn spawn_scheduler(deps: Arc<Deps>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(CLEANUP_WARM_SCHEDULE_INTERVAL_SECONDS)).await;
            if let Err(err) = deps.job_queue.enqueue(QueueName::CleanupWarm, serde_json::json!({})).await {
                log::error!("failed to enqueue a cleanup-warm sweep: {err}");
            }
        }
    })
}

pub async fn handle(deps: &Deps, _job: &Job) -> anyhow::Result<()> {
    let cutoff = chrono::Utc::now() - chrono::Duration::seconds(WARM_SWEEP_AFTER_PERMANENT_SECONDS);
    let mut cursor = deps.cursor_store.get(CURSOR_NAME).await?;
    let mut consecutive_errors = 0u32;
    let mut last_heartbeat = Instant::now();

    loop {
        let batch = deps.item_store.permanent_older_than(cutoff, cursor, CLEANUP_WARM_BATCH_SIZE).await?;
        if batch.is_empty() {
            deps.cursor_store.clear(CURSOR_NAME).await?;
            return Ok(());
        }

        let results: Vec<(ContentId, anyhow::Result<()>)> = stream::iter(batch.iter().map(|item| item.content_id))
            .map(|id| async move { (id, deps.triple_store.sweep_warm(id).await.map_err(anyhow::Error::from)) })
            .buffer_unordered(CLEANUP_WARM_CONCURRENCY)
            .collect()
            .await;

        for (id, result) in &results {
            match result {
                Ok(()) => consecutive_errors = 0,
                Err(err) => {
                    consecutive_errors += 1;
                    log::warn!("cleanup-warm sweep of {id} failed ({consecutive_errors} consecutive): {err}");
                    if consecutive_errors >= CLEANUP_WARM_MAX_CONSECUTIVE_ERRORS {
                        anyhow::bail!("cleanup-warm sweep aborted after {consecutive_errors} consecutive errors, cursor held at {:?}", cursor);
                    }
                }
            }
        }

        cursor = Some(batch.last().expect("checked non-empty above").content_id);
        deps.cursor_store.set(CURSOR_NAME, cursor.expect("just set")).await?;

        if last_heartbeat.elapsed() >= Duration::from_secs(CLEANUP_WARM_HEARTBEAT_SECONDS) {
            log::info!("cleanup-warm sweep progressing, cursor at {}", cursor.expect("just set"));
            last_heartbeat = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use gateway_common::money::Credits;
    use gateway_common::tags::TagList;
    use uuid::Uuid;

    use super::*;
    use crate::deps::test_support::fake_deps;
    use crate::items::{DataItem, ItemStore};
    use crate::queue::JobStatus;

    fn job() -> Job {
        Job {
            id: Uuid::new_v4(),
            queue: QueueName::CleanupWarm,
            payload: serde_json::json!({}),
            attempt: 0,
            status: JobStatus::Running,
            available_at: Utc::now(),
            created_at: Utc::now(),
            last_error: None,
        }
    }

    async fn seed_permanent_item(deps: &Deps, id: u8) -> ContentId {
        let content_id = ContentId::new([id; 32]);
        deps.item_store
            .insert_batch(vec![DataItem::new(content_id, "alice", 10, Credits(1), &TagList::default(), 1_000, None)])
            .await
            .unwrap();
        deps.item_store.mark_permanent(&[content_id]).await.unwrap();
        deps.triple_store.write_item(content_id, b"payload").await.unwrap();
        content_id
    }

    #[tokio::test]
    async fn sweeps_warm_copies_of_old_permanent_items_and_clears_the_cursor() {
        let deps = fake_deps();
        let old_item = seed_permanent_item(&deps, 1).await;

        // backdate created_at so it is past the retention window.
        let mut item = deps.item_store.get(old_item).await.unwrap().unwrap();
        item.created_at = Utc::now() - chrono::Duration::hours(48);
        deps.item_store.insert_batch(vec![item]).await.unwrap();

        assert!(deps.triple_store.warm.read(old_item).await.unwrap().is_some());
        handle(&deps, &job()).await.unwrap();
        assert!(deps.triple_store.warm.read(old_item).await.unwrap().is_none());
        assert!(deps.cursor_store.get("cleanup_warm").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recently_permanent_items_are_left_alone() {
        let deps = fake_deps();
        let recent_item = seed_permanent_item(&deps, 2).await;

        handle(&deps, &job()).await.unwrap();

        assert!(deps.triple_store.warm.read(recent_item).await.unwrap().is_some());
    }
}
