//! §4.6 "Triple Store": every accepted item is written to cold (commit point),
//! then warm (best-effort), then hot (cache). Reads prefer hot, then warm, then
//! cold. Modeled per §9's design note "three Redis-like roles -> three logical
//! interfaces": hot is a KV-with-TTL, warm a filesystem mirror, cold the
//! object-store commit point — three independent traits rather than one backing
//! store with three roles baked in.

pub mod cold;
pub mod hot;
pub mod warm;

use std::sync::Arc;

use gateway_common::ContentId;
use thiserror::Error;

pub use cold::ColdStore;
pub use hot::HotCache;
pub use warm::WarmStore;

#[derive(Debug, Error)]
pub enum TripleStoreError {
    #[error("cold store write failed after retries: {0}")]
    ColdWriteFailed(anyhow::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Small fixed retry budget for each store in the triple-write (§4.5 step 7:
/// "retry each up to a small fixed budget").
const WRITE_RETRY_ATTEMPTS: u32 = 3;

/// Coordinates the three stores behind the §4.6 contract: cold is the commit
/// point, warm is best-effort, hot is populated last so a read immediately after
/// accept hits the cache.
pub struct TripleStore {
    pub cold: Arc<dyn ColdStore>,
    pub warm: Arc<dyn WarmStore>,
    pub hot: Arc<dyn HotCache>,
}

impl TripleStore {
    pub fn new(cold: Arc<dyn ColdStore>, warm: Arc<dyn WarmStore>, hot: Arc<dyn HotCache>) -> Self {
        Self { cold, warm, hot }
    }

    /// §4.5 step 7 / §4.6: writes cold first (the commit point — the item is not
    /// accepted until this returns success), then warm and hot best-effort. Returns
    /// an error only when the cold write itself exhausts its retry budget.
    pub async fn write_item(&self, id: ContentId, bytes: &[u8]) -> Result<(), TripleStoreError> {
        let mut last_err = None;
        for attempt in 0..WRITE_RETRY_ATTEMPTS {
            match self.cold.put(id, bytes).await {
                Ok(()) => {
                    last_err = None;
                    break;
                }
                Err(err) => {
                    log::warn!("cold store write for {id} failed (attempt {}): {err}", attempt + 1);
                    last_err = Some(err);
                }
            }
        }
        if let Some(err) = last_err {
            return Err(TripleStoreError::ColdWriteFailed(err));
        }

        if let Err(err) = self.warm.write(id, bytes).await {
            log::warn!("warm store write for {id} failed (best-effort, ignored): {err}");
        }
        if let Err(err) = self.hot.put(id, bytes.to_vec()).await {
            log::warn!("hot cache write for {id} failed (best-effort, ignored): {err}");
        }
        Ok(())
    }

    /// Read path: hot, then warm, then cold (§4.6).
    pub async fn read_item(&self, id: ContentId) -> Result<Option<Vec<u8>>, TripleStoreError> {
        if let Some(bytes) = self.hot.get(id).await? {
            return Ok(Some(bytes));
        }
        if let Some(bytes) = self.warm.read(id).await? {
            return Ok(Some(bytes));
        }
        Ok(self.cold.get(id).await?)
    }

    /// Best-effort cleanup of the warm copy without touching cold (§4.6 "Warm is
    /// best-effort and permits later cleanup without re-reading cold").
    pub async fn sweep_warm(&self, id: ContentId) -> Result<(), TripleStoreError> {
        self.warm.delete(id).await?;
        Ok(())
    }

    /// §4.6 "Hot quarantine namespace captures verification-rejected content for
    /// 24h for postmortem".
    pub async fn quarantine(&self, id: ContentId, bytes: Vec<u8>) -> Result<(), TripleStoreError> {
        self.hot.quarantine(id, bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
pub fn fake_triple_store() -> TripleStore {
    TripleStore::new(
        Arc::new(cold::InMemoryColdStore::new()),
        Arc::new(warm::InMemoryWarmStore::new()),
        Arc::new(hot::InMemoryHotCache::new()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_prefers_hot_but_falls_back_to_cold() {
        let store = fake_triple_store();
        let id = ContentId::from_signature(b"sig");
        store.write_item(id, b"hello").await.unwrap();
        assert_eq!(store.read_item(id).await.unwrap(), Some(b"hello".to_vec()));

        store.hot.evict(id).await.unwrap();
        store.sweep_warm(id).await.unwrap();
        assert_eq!(store.read_item(id).await.unwrap(), Some(b"hello".to_vec()));
    }
}
