//! Tiny persisted-cursor store for long-running scans that must resume across
//! restarts rather than start over (§4.8 cleanup-warm "cursor persisted in a
//! config row"). Deliberately minimal: one named cursor is one content id.

pub mod postgres;

use async_trait::async_trait;
use gateway_common::ContentId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CursorError {
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<ContentId>, CursorError>;
    async fn set(&self, name: &str, value: ContentId) -> Result<(), CursorError>;
    async fn clear(&self, name: &str) -> Result<(), CursorError>;
}

pub struct InMemoryCursorStore {
    inner: std::sync::Mutex<std::collections::HashMap<String, ContentId>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self { inner: std::sync::Mutex::new(std::collections::HashMap::new()) }
    }
}

impl Default for InMemoryCursorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn get(&self, name: &str) -> Result<Option<ContentId>, CursorError> {
        Ok(self.inner.lock().unwrap().get(name).copied())
    }

    async fn set(&self, name: &str, value: ContentId) -> Result<(), CursorError> {
        self.inner.lock().unwrap().insert(name.to_string(), value);
        Ok(())
    }

    async fn clear(&self, name: &str) -> Result<(), CursorError> {
        self.inner.lock().unwrap().remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use gateway_common::ContentId;

    use super::*;

    #[tokio::test]
    async fn remembers_the_last_set_cursor_until_cleared() {
        let store = InMemoryCursorStore::new();
        assert!(store.get("cleanup_warm").await.unwrap().is_none());

        let id = ContentId::new([7; 32]);
        store.set("cleanup_warm", id).await.unwrap();
        assert_eq!(store.get("cleanup_warm").await.unwrap(), Some(id));

        store.clear("cleanup_warm").await.unwrap();
        assert!(store.get("cleanup_warm").await.unwrap().is_none());
    }
}
