//! Checkpoint store port
//!
//! Key-value persistence for session checkpoints. Keys render as
//! `"{session_id}/{timestamp}"`, so `list(&format!("{id}/"))` enumerates one
//! session and `list("")` enumerates everything.

use async_trait::async_trait;
use diligence_domain::{Checkpoint, CheckpointKey, SessionId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("checkpoint store I/O error: {0}")]
    Io(String),

    #[error("failed to encode checkpoint {key}: {reason}")]
    Encode { key: String, reason: String },

    #[error("corrupt checkpoint {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for StoreError {
    fn from(error: std::io::Error) -> Self {
        StoreError::Io(error.to_string())
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint atomically: readers see the old state or the new
    /// one, never a partial write.
    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    async fn get(&self, key: &CheckpointKey) -> Result<Option<Checkpoint>, StoreError>;

    /// Keys whose rendered form starts with `prefix`, oldest first.
    async fn list(&self, prefix: &str) -> Result<Vec<CheckpointKey>, StoreError>;

    async fn delete(&self, key: &CheckpointKey) -> Result<(), StoreError>;

    /// Most recent checkpoint of `session_id`.
    async fn latest(&self, session_id: &SessionId) -> Result<Option<Checkpoint>, StoreError> {
        let keys = self.list(&CheckpointKey::session_prefix(session_id)).await?;
        match keys.last() {
            Some(key) => self.get(key).await,
            None => Ok(None),
        }
    }

    /// Every session with at least one checkpoint.
    async fn sessions(&self) -> Result<BTreeSet<SessionId>, StoreError> {
        Ok(self
            .list("")
            .await?
            .into_iter()
            .map(|key| key.session_id)
            .collect())
    }
}

/// In-process store, used for ephemeral runs and tests.
///
/// Checkpoints are kept serialized so a round trip through the store behaves
/// like a real backend.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    failing_puts: AtomicU32,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` puts fail with [`StoreError::Unavailable`].
    pub fn fail_next_puts(&self, count: u32) {
        self.failing_puts.store(count, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let injected = self
            .failing_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }

        let key = checkpoint.key.to_string();
        let bytes = serde_json::to_vec(checkpoint).map_err(|e| StoreError::Encode {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.lock().insert(key, bytes);
        Ok(())
    }

    async fn get(&self, key: &CheckpointKey) -> Result<Option<Checkpoint>, StoreError> {
        let key = key.to_string();
        let Some(bytes) = self.lock().get(&key).cloned() else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key,
                reason: e.to_string(),
            })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<CheckpointKey>, StoreError> {
        self.lock()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .map(|key| {
                key.parse::<CheckpointKey>()
                    .map_err(|e| StoreError::Corrupt {
                        key: key.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect()
    }

    async fn delete(&self, key: &CheckpointKey) -> Result<(), StoreError> {
        self.lock().remove(&key.to_string());
        Ok(())
    }
}
