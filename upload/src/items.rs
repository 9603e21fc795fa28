//! Data items (§3 "Data item"): the unit of ingestion. An item moves through
//! exactly one of `{new, planned, permanent, failed}` at any moment (§3 invariant),
//! tracked here as [`ItemStatus`] rather than four separate tables.

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gateway_common::money::Credits;
use gateway_common::tags::TagList;
use gateway_common::ContentId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ItemError {
    #[error("item {0} not found")]
    NotFound(ContentId),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ItemStatus {
    New,
    Planned,
    Permanent,
    Failed,
}

/// §3 "Data item". `failed_bundles` accumulates one chain tx id per dropped bundle
/// this item was requeued out of (§4.8 verifier "failed_bundles list extended").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataItem {
    pub content_id: ContentId,
    pub owner_address: String,
    pub byte_count: u64,
    pub assessed_price: Credits,
    pub content_type: Option<String>,
    pub premium_tag: Option<String>,
    pub deadline_height: u64,
    pub failed_bundles: Vec<String>,
    pub status: ItemStatus,
    pub plan_id: Option<uuid::Uuid>,
    pub is_nested_bundle: bool,
    pub created_at: DateTime<Utc>,
}

impl DataItem {
    pub fn new(
        content_id: ContentId,
        owner_address: impl Into<String>,
        byte_count: u64,
        assessed_price: Credits,
        tags: &TagList,
        deadline_height: u64,
        premium_tag: Option<String>,
    ) -> Self {
        let decoded = gateway_common::tags::DecodedTags::from(tags);
        Self {
            content_id,
            owner_address: owner_address.into(),
            byte_count,
            assessed_price,
            content_type: decoded.content_type,
            premium_tag,
            deadline_height,
            failed_bundles: Vec::new(),
            status: ItemStatus::New,
            plan_id: None,
            is_nested_bundle: decoded.is_nested_bundle,
            created_at: Utc::now(),
        }
    }
}

/// Upload-service-owned item state (§3 "Ownership": upload owns item/bundle/offset
/// state exclusively).
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn insert_batch(&self, items: Vec<DataItem>) -> Result<(), ItemError>;
    async fn get(&self, id: ContentId) -> Result<Option<DataItem>, ItemError>;
    /// Items eligible for planning: `status = new` and either overdue (`deadline_height
    /// - current_height <= BUNDLE_OVERDUE_BLOCKS`) or any age (planner cycle reached —
    /// the caller decides which by passing `current_height = None` to mean "everything").
    async fn eligible_for_planning(&self, current_height: Option<u64>, overdue_blocks: u64) -> Result<Vec<DataItem>, ItemError>;
    /// Transactionally moves `items` from `new` to `planned`, binding `plan_id` (§4.8
    /// planner step "Persist").
    async fn mark_planned(&self, item_ids: &[ContentId], plan_id: uuid::Uuid) -> Result<(), ItemError>;
    async fn mark_permanent(&self, item_ids: &[ContentId]) -> Result<(), ItemError>;
    /// Requeues items to `new`, clearing `plan_id` and appending `failed_bundle_tx_id`
    /// to each item's history (§4.8 verifier "dropped" path).
    async fn requeue(&self, item_ids: &[ContentId], failed_bundle_tx_id: &str, new_deadline_height: u64) -> Result<(), ItemError>;
    async fn mark_failed(&self, id: ContentId, _reason: &str) -> Result<(), ItemError>;
    /// Page through `permanent` items created before `cutoff`, ordered by content id,
    /// resuming after `after` (§4.8 cleanup-warm "cursor persisted in a config row").
    async fn permanent_older_than(&self, cutoff: DateTime<Utc>, after: Option<ContentId>, limit: usize) -> Result<Vec<DataItem>, ItemError>;
}

pub struct InMemoryItemStore {
    inner: std::sync::Mutex<std::collections::HashMap<ContentId, DataItem>>,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self { inner: std::sync::Mutex::new(std::collections::HashMap::new()) }
    }
}

impl Default for InMemoryItemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ItemStore for InMemoryItemStore {
    async fn insert_batch(&self, items: Vec<DataItem>) -> Result<(), ItemError> {
        let mut inner = self.inner.lock().unwrap();
        for item in items {
            inner.insert(item.content_id, item);
        }
        Ok(())
    }

    async fn get(&self, id: ContentId) -> Result<Option<DataItem>, ItemError> {
        Ok(self.inner.lock().unwrap().get(&id).cloned())
    }

    async fn eligible_for_planning(&self, current_height: Option<u64>, overdue_blocks: u64) -> Result<Vec<DataItem>, ItemError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .values()
            .filter(|item| {
                item.status == ItemStatus::New
                    && match current_height {
                        None => true,
                        Some(height) => item.deadline_height.saturating_sub(height) <= overdue_blocks,
                    }
            })
            .cloned()
            .collect())
    }

    async fn mark_planned(&self, item_ids: &[ContentId], plan_id: uuid::Uuid) -> Result<(), ItemError> {
        let mut inner = self.inner.lock().unwrap();
        for id in item_ids {
            if let Some(item) = inner.get_mut(id) {
                item.status = ItemStatus::Planned;
                item.plan_id = Some(plan_id);
            }
        }
        Ok(())
    }

    async fn mark_permanent(&self, item_ids: &[ContentId]) -> Result<(), ItemError> {
        let mut inner = self.inner.lock().unwrap();
        for id in item_ids {
            if let Some(item) = inner.get_mut(id) {
                item.status = ItemStatus::Permanent;
            }
        }
        Ok(())
    }

    async fn requeue(&self, item_ids: &[ContentId], failed_bundle_tx_id: &str, new_deadline_height: u64) -> Result<(), ItemError> {
        let mut inner = self.inner.lock().unwrap();
        for id in item_ids {
            if let Some(item) = inner.get_mut(id) {
                item.status = ItemStatus::New;
                item.plan_id = None;
                item.failed_bundles.push(failed_bundle_tx_id.to_string());
                item.deadline_height = new_deadline_height;
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, id: ContentId, _reason: &str) -> Result<(), ItemError> {
        if let Some(item) = self.inner.lock().unwrap().get_mut(&id) {
            item.status = ItemStatus::Failed;
        }
        Ok(())
    }

    async fn permanent_older_than(&self, cutoff: DateTime<Utc>, after: Option<ContentId>, limit: usize) -> Result<Vec<DataItem>, ItemError> {
        let inner = self.inner.lock().unwrap();
        let mut matching: Vec<DataItem> = inner
            .values()
            .filter(|item| {
                item.status == ItemStatus::Permanent
                    && item.created_at < cutoff
                    && after.map(|cursor| item.content_id > cursor).unwrap_or(true)
            })
            .cloned()
            .collect();
        matching.sort_by_key(|item| item.content_id);
        matching.truncate(limit);
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: u8, deadline: u64) -> DataItem {
        DataItem::new(
            ContentId::new([id; 32]),
            "alice",
            1024,
            Credits(10),
            &TagList::default(),
            deadline,
            None,
        )
    }

    #[tokio::test]
    async fn item_is_in_exactly_one_table_at_a_time() {
        let store = InMemoryItemStore::new();
        let item = item(1, 100);
        let id = item.content_id;
        store.insert_batch(vec![item]).await.unwrap();

        let plan_id = uuid::Uuid::new_v4();
        store.mark_planned(&[id], plan_id).await.unwrap();
        let fetched = store.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.status, ItemStatus::Planned);
        assert_eq!(fetched.plan_id, Some(plan_id));

        store.mark_permanent(&[id]).await.unwrap();
        assert_eq!(store.get(id).await.unwrap().unwrap().status, ItemStatus::Permanent);
    }

    #[tokio::test]
    async fn requeue_extends_failed_bundle_history_and_resets_deadline() {
        let store = InMemoryItemStore::new();
        let item = item(2, 50);
        let id = item.content_id;
        store.insert_batch(vec![item]).await.unwrap();
        store.mark_planned(&[id], uuid::Uuid::new_v4()).await.unwrap();

        store.requeue(&[id], "tx-abc", 250).await.unwrap();
        let fetched = store.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.status, ItemStatus::New);
        assert!(fetched.plan_id.is_none());
        assert_eq!(fetched.failed_bundles, vec!["tx-abc".to_string()]);
        assert_eq!(fetched.deadline_height, 250);
    }

    #[tokio::test]
    async fn eligible_for_planning_filters_by_overdue_window() {
        let store = InMemoryItemStore::new();
        store.insert_batch(vec![item(3, 1_000), item(4, 10)]).await.unwrap();
        let eligible = store.eligible_for_planning(Some(900), 200).await.unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].content_id, ContentId::new([4; 32]));
    }

    #[tokio::test]
    async fn permanent_older_than_pages_by_content_id_cursor() {
        let store = InMemoryItemStore::new();
        let ids = [ContentId::new([1; 32]), ContentId::new([2; 32]), ContentId::new([3; 32])];
        for id in ids {
            store.insert_batch(vec![DataItem::new(id, "alice", 1, Credits(1), &TagList::default(), 100, None)]).await.unwrap();
            store.mark_permanent(&[id]).await.unwrap();
        }

        let future_cutoff = Utc::now() + chrono::Duration::hours(1);
        let page1 = store.permanent_older_than(future_cutoff, None, 2).await.unwrap();
        assert_eq!(page1.len(), 2);
        assert_eq!(page1[0].content_id, ids[0]);
        assert_eq!(page1[1].content_id, ids[1]);

        let page2 = store.permanent_older_than(future_cutoff, Some(page1[1].content_id), 2).await.unwrap();
        assert_eq!(page2.len(), 1);
        assert_eq!(page2[0].content_id, ids[2]);

        let past_cutoff = Utc::now() - chrono::Duration::hours(1);
        assert!(store.permanent_older_than(past_cutoff, None, 10).await.unwrap().is_empty());
    }
}
