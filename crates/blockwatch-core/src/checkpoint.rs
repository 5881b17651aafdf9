//! Checkpoint store — persists the last processed block height.
//!
//! On restart the watcher skips every head at or below the stored height.
//! Loading never fails: a missing, unreadable or corrupt checkpoint reads as
//! "absent" and the watcher starts from height 0.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::WatchError;

/// Trait for storing and loading the checkpoint height.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the stored height, or `None` if there is no usable checkpoint.
    async fn load(&self) -> Option<u64>;

    /// Overwrite the stored height.
    async fn save(&self, height: u64) -> Result<(), WatchError>;
}

#[async_trait]
impl<T: CheckpointStore + ?Sized> CheckpointStore for Arc<T> {
    async fn load(&self) -> Option<u64> {
        (**self).load().await
    }

    async fn save(&self, height: u64) -> Result<(), WatchError> {
        (**self).save(height).await
    }
}

// ─── File store ───────────────────────────────────────────────────────────────

/// Checkpoint kept as a decimal string in a plain text file.
///
/// Writes replace the whole file and are not atomic; a torn write reads back
/// as corrupt, which loads as absent.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> Option<u64> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no checkpoint file");
                return None;
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "checkpoint unreadable");
                return None;
            }
        };
        match text.trim().parse::<u64>() {
            Ok(height) => Some(height),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    contents = %text.trim(),
                    error = %e,
                    "checkpoint corrupt, ignoring"
                );
                None
            }
        }
    }

    async fn save(&self, height: u64) -> Result<(), WatchError> {
        tokio::fs::write(&self.path, height.to_string()).await?;
        Ok(())
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

/// In-memory checkpoint store for tests and `--no-persist` runs.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    height: Mutex<Option<u64>>,
    fail_saves: AtomicBool,
    saves: Mutex<Vec<u64>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `height`.
    pub fn with_height(height: u64) -> Self {
        let store = Self::default();
        *store.height.lock().unwrap() = Some(height);
        store
    }

    /// Make every subsequent `save` fail with an I/O error.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::Relaxed);
    }

    /// Every height passed to `save`, including failed attempts.
    pub fn save_history(&self) -> Vec<u64> {
        self.saves.lock().unwrap().clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> Option<u64> {
        *self.height.lock().unwrap()
    }

    async fn save(&self, height: u64) -> Result<(), WatchError> {
        self.saves.lock().unwrap().push(height);
        if self.fail_saves.load(Ordering::Relaxed) {
            return Err(WatchError::Checkpoint(std::io::Error::new(
                ErrorKind::Other,
                "simulated write failure",
            )));
        }
        *self.height.lock().unwrap() = Some(height);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("last_block.txt"));

        assert!(store.load().await.is_none());

        store.save(500).await.unwrap();
        assert_eq!(store.load().await, Some(500));

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw, "500");
    }

    #[tokio::test]
    async fn file_store_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("cp"));
        store.save(123_456).await.unwrap();
        store.save(7).await.unwrap();
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "7");
    }

    #[tokio::test]
    async fn corrupt_file_loads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp");

        std::fs::write(&path, "12ab").unwrap();
        assert!(FileCheckpointStore::new(&path).load().await.is_none());

        std::fs::write(&path, "").unwrap();
        assert!(FileCheckpointStore::new(&path).load().await.is_none());

        std::fs::write(&path, "-5").unwrap();
        assert!(FileCheckpointStore::new(&path).load().await.is_none());
    }

    #[tokio::test]
    async fn surrounding_whitespace_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp");
        std::fs::write(&path, " 42\n").unwrap();
        assert_eq!(FileCheckpointStore::new(&path).load().await, Some(42));
    }

    #[tokio::test]
    async fn save_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("nope").join("cp"));
        let err = store.save(1).await.unwrap_err();
        assert!(matches!(err, WatchError::Checkpoint(_)));
    }

    #[tokio::test]
    async fn memory_store_failure_keeps_old_value() {
        let store = MemoryCheckpointStore::with_height(10);
        store.fail_saves(true);
        assert!(store.save(11).await.is_err());
        assert_eq!(store.load().await, Some(10));
        assert_eq!(store.save_history(), vec![11]);
    }
}
