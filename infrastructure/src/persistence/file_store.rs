//! Directory-backed checkpoint store
//!
//! Layout: `<root>/<session_id>/<timestamp>.json`, one JSON document per
//! checkpoint. Writes go to a hidden temp file in the same directory and are
//! renamed into place, so a reader never observes a partial checkpoint.

use async_trait::async_trait;
use diligence_application::{CheckpointStore, StoreError};
use diligence_domain::{Checkpoint, CheckpointKey};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const EXTENSION: &str = "json";

pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    /// Store rooted at `root`; the directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &CheckpointKey) -> PathBuf {
        let rendered = key.to_string();
        let stamp = rendered
            .split_once('/')
            .map_or(rendered.as_str(), |(_, stamp)| stamp);
        self.root
            .join(key.session_id.to_string())
            .join(format!("{stamp}.{EXTENSION}"))
    }

    /// Keys stored under one session directory, unsorted.
    async fn keys_in(&self, session_dir: &Path, session: &str) -> Result<Vec<CheckpointKey>, StoreError> {
        let mut keys = Vec::new();
        let mut entries = match fs::read_dir(session_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stamp) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stamp.starts_with('.') {
                continue;
            }
            match CheckpointKey::parse(&format!("{session}/{stamp}")) {
                Ok(key) => keys.push(key),
                Err(e) => warn!(path = %path.display(), error = %e, "Ignoring stray file in checkpoint store"),
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let key = checkpoint.key.to_string();
        let bytes = serde_json::to_vec_pretty(checkpoint).map_err(|e| StoreError::Encode {
            key: key.clone(),
            reason: e.to_string(),
        })?;

        let path = self.path_for(&checkpoint.key);
        let Some(dir) = path.parent() else {
            return Err(StoreError::Io(format!("invalid checkpoint path {}", path.display())));
        };
        fs::create_dir_all(dir).await?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("checkpoint");
        let temp = dir.join(format!(".{file_name}.tmp"));
        let mut file = fs::File::create(&temp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        debug!(key = %key, bytes = bytes.len(), "Checkpoint written");
        Ok(())
    }

    async fn get(&self, key: &CheckpointKey) -> Result<Option<Checkpoint>, StoreError> {
        let bytes = match fs::read(self.path_for(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<CheckpointKey>, StoreError> {
        let mut sessions = Vec::new();
        match prefix.split_once('/') {
            // Narrow to one session directory when the prefix names it.
            Some((session, _)) => sessions.push(session.to_string()),
            None => {
                let mut entries = match fs::read_dir(&self.root).await {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
                    Err(e) => return Err(e.into()),
                };
                while let Some(entry) = entries.next_entry().await? {
                    if entry.file_type().await?.is_dir()
                        && let Some(name) = entry.file_name().to_str()
                    {
                        sessions.push(name.to_string());
                    }
                }
            }
        }

        let mut keys = Vec::new();
        for session in sessions {
            let dir = self.root.join(&session);
            keys.extend(self.keys_in(&dir, &session).await?);
        }
        keys.retain(|key| key.to_string().starts_with(prefix));
        keys.sort_by_key(|key| key.to_string());
        Ok(keys)
    }

    async fn delete(&self, key: &CheckpointKey) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
