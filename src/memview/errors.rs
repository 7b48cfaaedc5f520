//! View engine error types

use thiserror::Error;

use crate::connection::{CheckpointStoreError, ConnectionError};

/// Result alias for view operations.
pub type ViewResult<T> = Result<T, ViewError>;

/// Errors surfaced by view operations.
///
/// Collaborator failures keep their own variants so callers can tell
/// a dead connection from broken checkpoint storage. Recoverable
/// checkpoint content problems (corrupt blob, foreign version, stale
/// schema tag) are not errors at all; they degrade to "no checkpoint".
#[derive(Debug, Error)]
pub enum ViewError {
    // ========================================================================
    // Collaborators
    // ========================================================================
    /// The server connection failed mid-operation.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Checkpoint persistence failed.
    #[error(transparent)]
    CheckpointStore(#[from] CheckpointStoreError),

    // ========================================================================
    // Configuration
    // ========================================================================
    /// A checkpoint operation ran before a store was configured.
    #[error("view '{0}' has no checkpoint store configured")]
    NoCheckpointStore(String),

    /// A reduce query ran against a view defined without a reduce
    /// function.
    #[error("view '{0}' has no reduce function")]
    MissingReduce(String),

    // ========================================================================
    // Internal
    // ========================================================================
    /// Checkpoint serialization failed.
    #[error("checkpoint encoding failed: {0}")]
    CheckpointEncode(String),

    /// A lock was poisoned by a panic in another thread.
    #[error("internal error: {0}")]
    Internal(String),
}
