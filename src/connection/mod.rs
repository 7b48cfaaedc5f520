//! # Connection
//!
//! Seam between the view engine and the database server. The engine
//! never talks HTTP itself; everything it needs from the server goes
//! through the [`Connection`] trait, so tests drive views with mock
//! connections and transports stay swappable.
//!
//! Three capabilities cover the whole protocol surface the views use:
//!
//! - a bulk view query that returns every current row plus the
//!   sequence it was computed at,
//! - a change-feed fetch returning entries since a given sequence,
//! - the connection's cached idea of the latest server sequence,
//!   answered without network access.

mod checkpoint_store;
mod errors;
mod sequence;

pub use checkpoint_store::{
    CheckpointStore, CheckpointStoreError, CheckpointStoreResult, FileCheckpointStore,
    MemoryCheckpointStore,
};
pub use errors::{ConnectionError, ConnectionResult};
pub use sequence::UpdateSequence;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memview::{ViewDefinition, ViewRow};

/// One entry from the change feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeEntry {
    /// Id of the changed document.
    pub id: String,
    /// True when the change is a deletion.
    #[serde(default)]
    pub deleted: bool,
    /// Current document body; absent for deletions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Feed position of this entry, when the transport reports one
    /// per entry (push feeds do, batch fetches may not).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<UpdateSequence>,
}

impl ChangeEntry {
    /// An updated (or created) document.
    pub fn updated(id: impl Into<String>, body: Value) -> Self {
        ChangeEntry {
            id: id.into(),
            deleted: false,
            body: Some(body),
            seq: None,
        }
    }

    /// A deleted document.
    pub fn deleted(id: impl Into<String>) -> Self {
        ChangeEntry {
            id: id.into(),
            deleted: true,
            body: None,
            seq: None,
        }
    }

    pub fn with_seq(mut self, seq: UpdateSequence) -> Self {
        self.seq = Some(seq);
        self
    }
}

/// A contiguous slice of the change feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeBatch {
    /// Entries in feed order. May contain several entries for one
    /// document; later entries win.
    pub entries: Vec<ChangeEntry>,
    /// Feed position after the last entry. Valid even when `entries`
    /// is empty.
    pub update_sequence: UpdateSequence,
}

impl ChangeBatch {
    pub fn new(entries: Vec<ChangeEntry>, update_sequence: UpdateSequence) -> Self {
        ChangeBatch {
            entries,
            update_sequence,
        }
    }

    /// A batch carrying no changes, only a feed position.
    pub fn empty(update_sequence: UpdateSequence) -> Self {
        ChangeBatch::new(Vec::new(), update_sequence)
    }
}

/// Result of a bulk view query: the server-computed rows and the
/// sequence they are current as of.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BulkQueryResult {
    pub rows: Vec<ViewRow>,
    pub update_sequence: UpdateSequence,
}

/// Server seam used by the view engine.
///
/// Implementations must be shareable across threads; the engine calls
/// them while holding its update lock, never its row-store lock.
pub trait Connection: Send + Sync {
    /// Run the server-side query for `view` and return every row.
    fn run_bulk_query(&self, view: &ViewDefinition) -> ConnectionResult<BulkQueryResult>;

    /// Fetch change-feed entries after `since`.
    fn fetch_changes_since(&self, since: &UpdateSequence) -> ConnectionResult<ChangeBatch>;

    /// The latest sequence this connection has seen from the server.
    /// Must answer from cache without touching the network.
    fn last_known_update_sequence(&self) -> ConnectionResult<UpdateSequence>;
}
