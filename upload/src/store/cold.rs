//! Cold store: the object store commit point (§4.6). The underlying object store
//! product is an external collaborator per spec.md §1; this module defines the
//! narrow put/get interface the rest of the upload service needs against it, with
//! a filesystem-backed implementation (bucket -> directory, key -> file) standing
//! in for a real S3-compatible client the way `gateway_payment::gasless::Facilitator`
//! pairs a fake with an HTTP implementation.

use std::path::PathBuf;

use async_trait::async_trait;
use gateway_common::ContentId;
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait ColdStore: Send + Sync {
    /// Bucket + key = item id (§4.6). `namespace` distinguishes item bodies from
    /// plan payloads/tx headers, which are also cold-stored keyed by plan id.
    async fn put_keyed(&self, namespace: &str, key: &str, bytes: &[u8]) -> Result<(), anyhow::Error>;
    async fn get_keyed(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, anyhow::Error>;

    async fn put(&self, id: ContentId, bytes: &[u8]) -> Result<(), anyhow::Error> {
        self.put_keyed("items", &id.to_base64url(), bytes).await
    }

    async fn get(&self, id: ContentId) -> Result<Option<Vec<u8>>, anyhow::Error> {
        self.get_keyed("items", &id.to_base64url()).await
    }
}

pub struct FsColdStore {
    root: PathBuf,
}

impl FsColdStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ColdStore for FsColdStore {
    async fn put_keyed(&self, namespace: &str, key: &str, bytes: &[u8]) -> Result<(), anyhow::Error> {
        let dir = self.root.join(namespace);
        tokio::fs::create_dir_all(&dir).await?;
        let mut file = tokio::fs::File::create(dir.join(key)).await?;
        file.write_all(bytes).await?;
        Ok(())
    }

    async fn get_keyed(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, anyhow::Error> {
        match tokio::fs::read(self.root.join(namespace).join(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

pub struct InMemoryColdStore {
    inner: std::sync::Mutex<std::collections::HashMap<(String, String), Vec<u8>>>,
}

impl InMemoryColdStore {
    pub fn new() -> Self {
        Self { inner: Default::default() }
    }
}

impl Default for InMemoryColdStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ColdStore for InMemoryColdStore {
    async fn put_keyed(&self, namespace: &str, key: &str, bytes: &[u8]) -> Result<(), anyhow::Error> {
        self.inner.lock().unwrap().insert((namespace.to_string(), key.to_string()), bytes.to_vec());
        Ok(())
    }

    async fn get_keyed(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, anyhow::Error> {
        Ok(self.inner.lock().unwrap().get(&(namespace.to_string(), key.to_string())).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_cold_store_round_trips_through_a_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsColdStore::new(dir.path());
        let id = ContentId::from_signature(b"sig");
        store.put(id, b"payload").await.unwrap();
        assert_eq!(store.get(id).await.unwrap(), Some(b"payload".to_vec()));
    }

    #[tokio::test]
    async fn namespaces_do_not_collide_on_the_same_key() {
        let store = InMemoryColdStore::new();
        store.put_keyed("items", "k", b"item-bytes").await.unwrap();
        store.put_keyed("plans", "k", b"plan-bytes").await.unwrap();
        assert_eq!(store.get_keyed("items", "k").await.unwrap(), Some(b"item-bytes".to_vec()));
        assert_eq!(store.get_keyed("plans", "k").await.unwrap(), Some(b"plan-bytes".to_vec()));
    }
}
