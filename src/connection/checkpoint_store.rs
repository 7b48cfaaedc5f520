//! Checkpoint byte stores
//!
//! A checkpoint store persists one opaque checkpoint blob per view.
//! The view engine never interprets the bytes here; encoding and
//! validation live in the checkpoint codec. Two implementations ship:
//! a file-backed store for real clients and an in-memory store for
//! tests and ephemeral views.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

/// Result alias for checkpoint store operations.
pub type CheckpointStoreResult<T> = Result<T, CheckpointStoreError>;

/// Errors surfaced by checkpoint persistence, distinct from codec and
/// connection failures so callers can tell storage trouble apart from
/// stale or corrupt checkpoint content.
#[derive(Debug, Error)]
pub enum CheckpointStoreError {
    #[error("checkpoint store {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl CheckpointStoreError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        CheckpointStoreError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Persistence seam for checkpoint blobs.
pub trait CheckpointStore: Send {
    /// Read the stored blob. `Ok(None)` means no checkpoint exists,
    /// which is not an error.
    fn load(&self) -> CheckpointStoreResult<Option<Vec<u8>>>;

    /// Replace the stored blob.
    fn save(&self, bytes: &[u8]) -> CheckpointStoreResult<()>;
}

// ============================================================================
// File-backed store
// ============================================================================

/// Stores the checkpoint blob in a single file.
///
/// Writes go through a sibling temp file and rename into place, then
/// sync, so a crash mid-write leaves the previous checkpoint intact.
#[derive(Debug)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        FileCheckpointStore {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> CheckpointStoreResult<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CheckpointStoreError::io(
                format!("read {}", self.path.display()),
                e,
            )),
        }
    }

    fn save(&self, bytes: &[u8]) -> CheckpointStoreResult<()> {
        let tmp = self.path.with_extension("tmp");
        let write = |path: &Path| -> std::io::Result<()> {
            let mut file = std::fs::File::create(path)?;
            std::io::Write::write_all(&mut file, bytes)?;
            // Durability first: the rename must never expose a
            // half-written blob.
            file.sync_all()?;
            Ok(())
        };
        write(&tmp)
            .map_err(|e| CheckpointStoreError::io(format!("write {}", tmp.display()), e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            CheckpointStoreError::io(format!("rename into {}", self.path.display()), e)
        })?;
        Ok(())
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Keeps the checkpoint blob in memory. Used by tests and by callers
/// that want checkpoint semantics without a filesystem.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        MemoryCheckpointStore::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self) -> CheckpointStoreResult<Option<Vec<u8>>> {
        match self.bytes.lock() {
            Ok(guard) => Ok(guard.clone()),
            Err(poisoned) => Ok(poisoned.into_inner().clone()),
        }
    }

    fn save(&self, bytes: &[u8]) -> CheckpointStoreResult<()> {
        match self.bytes.lock() {
            Ok(mut guard) => *guard = Some(bytes.to_vec()),
            Err(poisoned) => *poisoned.into_inner() = Some(bytes.to_vec()),
        }
        Ok(())
    }
}
