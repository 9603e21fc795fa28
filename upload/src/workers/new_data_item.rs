//! §4.8 "new-data-item". Ingestion (`ingest::run_claimed`) inserts the item row
//! inline at accept time so a client's very next `GET /tx/:id` sees it (§5
//! "no component assumes single-threaded cooperative execution" cuts both ways:
//! read-your-writes on the hot path matters more than batching the insert). This
//! handler is the durable confirmation step the fabric still runs per job:
//! idempotent by content id, so a re-claim after a crash is harmless.

use crate::deps::Deps;
use crate::items::ItemStatus;
use crate::queue::Job;

pub async fn handle(deps: &Deps, job: &Job) -> anyhow::Result<()> {
    let content_id = super::content_id_from_payload(job)?;
    match deps.item_store.get(content_id).await? {
        Some(item) => {
            log::debug!("new-data-item confirmed {content_id} (status {:?})", item.status);
            Ok(())
        }
        None => {
            // Accept raced ahead of this job somehow losing the row; nothing to
            // recover from here but surfacing it keeps the queue's retry/failed
            // accounting honest instead of silently swallowing data loss.
            anyhow::bail!("item {content_id} missing from the item store")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use gateway_common::money::Credits;
    use gateway_common::tags::TagList;
    use gateway_common::ContentId;

    use super::*;
    use crate::items::{DataItem, InMemoryItemStore, ItemStore};
    use crate::queue::{JobStatus, QueueName};

    fn job_for(id: ContentId) -> Job {
        Job {
            id: uuid::Uuid::new_v4(),
            queue: QueueName::NewDataItem,
            payload: serde_json::json!({ "content_id": id.to_base64url() }),
            attempt: 0,
            status: JobStatus::Running,
            available_at: chrono::Utc::now(),
            created_at: chrono::Utc::now(),
            last_error: None,
        }
    }

    #[tokio::test]
    async fn confirms_an_item_that_exists() {
        let item_store: Arc<dyn ItemStore> = Arc::new(InMemoryItemStore::new());
        let id = ContentId::from_signature(b"sig");
        item_store.insert_batch(vec![DataItem::new(id, "alice", 100, Credits(10), &TagList::default(), 500, None)]).await.unwrap();

        let deps = crate::deps::test_support::fake_deps_with(item_store);
        assert!(handle(&deps, &job_for(id)).await.is_ok());
    }

    #[tokio::test]
    async fn fails_when_the_item_row_is_missing() {
        let deps = crate::deps::test_support::fake_deps();
        let id = ContentId::from_signature(b"missing");
        assert!(handle(&deps, &job_for(id)).await.is_err());
    }

    #[test]
    fn status_is_new_on_insert() {
        let item = DataItem::new(ContentId::from_signature(b"x"), "alice", 10, Credits(1), &TagList::default(), 10, None);
        assert_eq!(item.status, ItemStatus::New);
    }
}
