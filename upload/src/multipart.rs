//! §3 "Multipart session" / §4.5 "Multipart session": `create` negotiates a chunk
//! size, `chunk upload` records uploaded offsets, `finalize` validates contiguity
//! and resumes the one-shot flow, `abort` tears the session down and releases any
//! reservation.

pub mod postgres;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gateway_common::config::{MULTIPART_DEFAULT_CHUNK_BYTES, MULTIPART_MAX_CHUNKS, MULTIPART_MAX_CHUNK_BYTES, MULTIPART_MIN_CHUNK_BYTES};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MultipartError {
    #[error("multipart session {0} not found")]
    NotFound(Uuid),
    #[error("session {0} is {1:?}, not in-progress")]
    WrongState(Uuid, SessionStatus),
    #[error("chunk size {0} out of bounds [{MULTIPART_MIN_CHUNK_BYTES}, {MULTIPART_MAX_CHUNK_BYTES}]")]
    ChunkSizeOutOfBounds(u64),
    #[error("chunk count would exceed the {MULTIPART_MAX_CHUNKS} chunk limit")]
    TooManyChunks,
    #[error("chunk set is not contiguous or does not total the declared size")]
    Incomplete,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Finalized,
    Aborted,
}

/// §3 "Multipart session".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipartSession {
    pub id: Uuid,
    pub owner_address: Option<String>,
    pub declared_total_size: u64,
    pub chunk_size: u64,
    pub uploaded_chunk_offsets: BTreeSet<u64>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

impl MultipartSession {
    /// §4.5 "create": negotiates `preferred_chunk_size` into `[5 MiB, 500 MiB]`,
    /// defaulting to 25 MiB when unset.
    pub fn new(declared_total_size: u64, preferred_chunk_size: Option<u64>) -> Result<Self, MultipartError> {
        let chunk_size = preferred_chunk_size.unwrap_or(MULTIPART_DEFAULT_CHUNK_BYTES);
        if !(MULTIPART_MIN_CHUNK_BYTES..=MULTIPART_MAX_CHUNK_BYTES).contains(&chunk_size) {
            return Err(MultipartError::ChunkSizeOutOfBounds(chunk_size));
        }
        let chunk_count = declared_total_size.div_ceil(chunk_size.max(1));
        if chunk_count > MULTIPART_MAX_CHUNKS as u64 {
            return Err(MultipartError::TooManyChunks);
        }
        Ok(Self {
            id: Uuid::new_v4(),
            owner_address: None,
            declared_total_size,
            chunk_size,
            uploaded_chunk_offsets: BTreeSet::new(),
            status: SessionStatus::InProgress,
            created_at: Utc::now(),
        })
    }

    /// §4.5 "finalize": validate that the chunk set is contiguous and totals the
    /// declared size. A single chunk equal to the total size is a valid, trivially
    /// contiguous case (§8 boundary behavior).
    pub fn is_complete(&self) -> bool {
        let mut expected = 0u64;
        for &offset in &self.uploaded_chunk_offsets {
            if offset != expected {
                return false;
            }
            let this_chunk_len = self.chunk_size.min(self.declared_total_size.saturating_sub(offset));
            expected += this_chunk_len;
        }
        expected == self.declared_total_size
    }
}

/// Cold-store namespace and key convention for an uploaded chunk's bytes, shared
/// between the `PUT .../multipart/:id/:offset` handler and `finalize-multipart`.
pub const CHUNK_NAMESPACE: &str = "multipart_chunks";

pub fn chunk_key(session_id: Uuid, offset: u64) -> String {
    format!("{session_id}:{offset}")
}

#[async_trait]
pub trait MultipartSessionStore: Send + Sync {
    async fn insert(&self, session: MultipartSession) -> Result<(), MultipartError>;
    async fn get(&self, id: Uuid) -> Result<Option<MultipartSession>, MultipartError>;
    async fn record_chunk(&self, id: Uuid, offset: u64) -> Result<(), MultipartError>;
    async fn set_status(&self, id: Uuid, status: SessionStatus) -> Result<(), MultipartError>;
}

pub struct InMemoryMultipartSessionStore {
    inner: std::sync::Mutex<std::collections::HashMap<Uuid, MultipartSession>>,
}

impl InMemoryMultipartSessionStore {
    pub fn new() -> Self {
        Self { inner: Default::default() }
    }
}

impl Default for InMemoryMultipartSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MultipartSessionStore for InMemoryMultipartSessionStore {
    async fn insert(&self, session: MultipartSession) -> Result<(), MultipartError> {
        self.inner.lock().unwrap().insert(session.id, session);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<MultipartSession>, MultipartError> {
        Ok(self.inner.lock().unwrap().get(&id).cloned())
    }

    async fn record_chunk(&self, id: Uuid, offset: u64) -> Result<(), MultipartError> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner.get_mut(&id).ok_or(MultipartError::NotFound(id))?;
        if session.status != SessionStatus::InProgress {
            return Err(MultipartError::WrongState(id, session.status));
        }
        session.uploaded_chunk_offsets.insert(offset);
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: SessionStatus) -> Result<(), MultipartError> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner.get_mut(&id).ok_or(MultipartError::NotFound(id))?;
        session.status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_chunk_equal_to_total_size_is_complete() {
        let mut session = MultipartSession::new(1_000, Some(MULTIPART_MIN_CHUNK_BYTES)).unwrap();
        session.declared_total_size = 1_000;
        session.chunk_size = 1_000;
        session.uploaded_chunk_offsets.insert(0);
        assert!(session.is_complete());
    }

    #[test]
    fn gap_in_chunk_offsets_is_not_complete() {
        let mut session = MultipartSession::new(30_000_000, Some(MULTIPART_MIN_CHUNK_BYTES)).unwrap();
        session.chunk_size = 10_000_000;
        session.declared_total_size = 30_000_000;
        session.uploaded_chunk_offsets.insert(0);
        session.uploaded_chunk_offsets.insert(20_000_000);
        assert!(!session.is_complete());
    }

    #[test]
    fn chunk_size_out_of_bounds_is_rejected() {
        assert!(MultipartSession::new(1_000, Some(1)).is_err());
        assert!(MultipartSession::new(1_000, Some(MULTIPART_MAX_CHUNK_BYTES + 1)).is_err());
    }
}
