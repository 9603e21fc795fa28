//! §4.9 "Offset index": `item id -> (root bundle id, start offset, raw length,
//! payload content type, payload data start, parent item id?)`. Persisted in a
//! table partitioned by insertion date (§6); TTL is implicit via partition drop at
//! [`gateway_common::config::OFFSET_INDEX_RETENTION_DAYS`].

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gateway_common::ContentId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OffsetIndexError {
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// §3 "Offset record". `parent_data_item_id` is set only for items extracted from
/// a nested bundle (§4.8 unbundle-nested).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffsetRecord {
    pub item_id: ContentId,
    pub root_bundle_id: String,
    pub start_offset_in_bundle: u64,
    pub raw_length: u64,
    pub payload_content_type: Option<String>,
    pub payload_data_start: u64,
    pub parent_data_item_id: Option<ContentId>,
    pub created_at: DateTime<Utc>,
}

impl OffsetRecord {
    /// §3 invariant: `start + raw length <= bundle payload size`.
    pub fn fits_within(&self, bundle_payload_size: u64) -> bool {
        self.start_offset_in_bundle.saturating_add(self.raw_length) <= bundle_payload_size
    }
}

#[async_trait]
pub trait OffsetIndexStore: Send + Sync {
    /// §4.8 put-offsets: "Deterministic, retry-safe" — upsert, not insert.
    async fn upsert_batch(&self, records: Vec<OffsetRecord>) -> Result<(), OffsetIndexError>;
    async fn get(&self, item_id: ContentId) -> Result<Option<OffsetRecord>, OffsetIndexError>;
}

pub struct InMemoryOffsetIndexStore {
    inner: std::sync::Mutex<std::collections::HashMap<ContentId, OffsetRecord>>,
}

impl InMemoryOffsetIndexStore {
    pub fn new() -> Self {
        Self { inner: Default::default() }
    }
}

impl Default for InMemoryOffsetIndexStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OffsetIndexStore for InMemoryOffsetIndexStore {
    async fn upsert_batch(&self, records: Vec<OffsetRecord>) -> Result<(), OffsetIndexError> {
        let mut inner = self.inner.lock().unwrap();
        for record in records {
            inner.insert(record.item_id, record);
        }
        Ok(())
    }

    async fn get(&self, item_id: ContentId) -> Result<Option<OffsetRecord>, OffsetIndexError> {
        Ok(self.inner.lock().unwrap().get(&item_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u8) -> OffsetRecord {
        OffsetRecord {
            item_id: ContentId::new([id; 32]),
            root_bundle_id: "tx-1".into(),
            start_offset_in_bundle: 100,
            raw_length: 50,
            payload_content_type: Some("text/plain".into()),
            payload_data_start: 110,
            parent_data_item_id: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_applied_twice_leaves_the_table_unchanged() {
        let store = InMemoryOffsetIndexStore::new();
        let r = record(1);
        store.upsert_batch(vec![r.clone()]).await.unwrap();
        store.upsert_batch(vec![r.clone()]).await.unwrap();
        let fetched = store.get(r.item_id).await.unwrap().unwrap();
        assert_eq!(fetched.start_offset_in_bundle, r.start_offset_in_bundle);
    }

    #[test]
    fn fits_within_rejects_overflow_past_bundle_size() {
        let r = record(2);
        assert!(r.fits_within(200));
        assert!(!r.fits_within(120));
    }
}
