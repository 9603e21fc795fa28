//! Warm store: local filesystem, sharded directory tree `id[0]/id[1]/id` (§4.6).
//! Best-effort: failures here never fail an upload, and the copy can be cleaned up
//! later without re-reading cold (§4.8 cleanup-warm).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use gateway_common::ContentId;
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait WarmStore: Send + Sync {
    async fn write(&self, id: ContentId, bytes: &[u8]) -> Result<(), anyhow::Error>;
    async fn read(&self, id: ContentId) -> Result<Option<Vec<u8>>, anyhow::Error>;
    async fn delete(&self, id: ContentId) -> Result<(), anyhow::Error>;
}

/// §4.6 "sharded directory tree `id[0]/id[1]/id`" keyed by the first two bytes of
/// the base64url id, so no directory ends up with an unbounded number of entries.
pub fn shard_path(root: &Path, id: ContentId) -> PathBuf {
    let encoded = id.to_base64url();
    let mut chars = encoded.chars();
    let first = chars.next().unwrap_or('_').to_string();
    let second = chars.next().unwrap_or('_').to_string();
    root.join(first).join(second).join(encoded)
}

pub struct FsWarmStore {
    root: PathBuf,
}

impl FsWarmStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl WarmStore for FsWarmStore {
    async fn write(&self, id: ContentId, bytes: &[u8]) -> Result<(), anyhow::Error> {
        let path = shard_path(&self.root, id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(bytes).await?;
        Ok(())
    }

    async fn read(&self, id: ContentId) -> Result<Option<Vec<u8>>, anyhow::Error> {
        let path = shard_path(&self.root, id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, id: ContentId) -> Result<(), anyhow::Error> {
        let path = shard_path(&self.root, id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

pub struct InMemoryWarmStore {
    inner: std::sync::Mutex<std::collections::HashMap<ContentId, Vec<u8>>>,
}

impl InMemoryWarmStore {
    pub fn new() -> Self {
        Self { inner: Default::default() }
    }
}

impl Default for InMemoryWarmStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WarmStore for InMemoryWarmStore {
    async fn write(&self, id: ContentId, bytes: &[u8]) -> Result<(), anyhow::Error> {
        self.inner.lock().unwrap().insert(id, bytes.to_vec());
        Ok(())
    }

    async fn read(&self, id: ContentId) -> Result<Option<Vec<u8>>, anyhow::Error> {
        Ok(self.inner.lock().unwrap().get(&id).cloned())
    }

    async fn delete(&self, id: ContentId) -> Result<(), anyhow::Error> {
        self.inner.lock().unwrap().remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_warm_store_round_trips_through_a_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsWarmStore::new(dir.path());
        let id = ContentId::from_signature(b"sig");
        store.write(id, b"payload").await.unwrap();
        assert_eq!(store.read(id).await.unwrap(), Some(b"payload".to_vec()));

        store.delete(id).await.unwrap();
        assert!(store.read(id).await.unwrap().is_none());
    }

    #[test]
    fn shard_path_uses_the_first_two_characters_as_directories() {
        let id = ContentId::from_signature(b"sig");
        let path = shard_path(Path::new("/warm"), id);
        let encoded = id.to_base64url();
        assert_eq!(path, Path::new("/warm").join(&encoded[..1]).join(&encoded[1..2]).join(&encoded));
    }
}
