//! Materialized view facade
//!
//! [`MemView`] owns one view's row store and drives its lifecycle:
//! bulk load, incremental change-feed updates, checkpoint save and
//! restore, queries, and observer notification.
//!
//! Two locks, always taken in the same order:
//!
//! - the sync lock serializes load, update, checkpoint and clear, so
//!   at most one synchronization runs at a time;
//! - the row-store lock (reader-writer) protects the index itself and
//!   is held only for short critical sections, never across mapper
//!   invocations or I/O.
//!
//! Observer callbacks run after both locks are released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, RwLockReadGuard, RwLockWriteGuard, TryLockError};
use std::sync::RwLock;

use serde_json::Value;

use crate::collation::Collation;
use crate::connection::{ChangeEntry, CheckpointStore, Connection, FileCheckpointStore, UpdateSequence};
use crate::observability::Logger;

use super::adapter::{SourceDocument, ViewDefinition};
use super::checkpoint;
use super::errors::{ViewError, ViewResult};
use super::observer::{ViewChangeEvent, ViewObserverRegistry};
use super::query::ViewQuery;
use super::reduce::GroupLevel;
use super::row::ViewRow;
use super::store::RowStore;

/// Lifecycle state of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    /// Never loaded: no rows, sequence at the beginning.
    Empty,
    /// Holds an index consistent with some feed position.
    Loaded,
    /// A synchronization is running right now.
    Updating,
}

/// Outcome of [`MemView::update_if_needed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The local sequence already matched the server's.
    AlreadyCurrent,
    /// A fetch ran and `applied` entries were indexed.
    Updated { applied: usize },
    /// Another thread held the sync lock and `wait` was off.
    InFlight,
}

/// Outcome of [`MemView::restore_from_checkpoint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Rows and sequence came back from the checkpoint.
    Restored { rows: usize },
    /// The store holds no checkpoint; the view is untouched.
    Missing,
    /// A blob existed but was rejected; the view was reset to empty
    /// so the next update resyncs from the beginning.
    Discarded { reason: &'static str },
}

struct CheckpointConfig {
    store: Box<dyn CheckpointStore>,
    schema_tag: String,
    /// Write a checkpoint after this many applied updates. Zero
    /// disables automatic writes.
    save_interval: usize,
}

struct SyncState {
    checkpoint: Option<CheckpointConfig>,
    updates_since_checkpoint: usize,
}

/// Clears the updating flag on every exit path.
struct UpdatingGuard<'a>(&'a AtomicBool);

impl<'a> UpdatingGuard<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        UpdatingGuard(flag)
    }
}

impl Drop for UpdatingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A locally materialized map/reduce view.
pub struct MemView {
    definition: ViewDefinition,
    store: RwLock<RowStore>,
    sync: Mutex<SyncState>,
    observers: ViewObserverRegistry,
    updating: AtomicBool,
}

impl MemView {
    pub fn new(definition: ViewDefinition) -> Self {
        let collation = definition.collation();
        MemView {
            definition,
            store: RwLock::new(RowStore::new(collation)),
            sync: Mutex::new(SyncState {
                checkpoint: None,
                updates_since_checkpoint: 0,
            }),
            observers: ViewObserverRegistry::new(),
            updating: AtomicBool::new(false),
        }
    }

    pub fn definition(&self) -> &ViewDefinition {
        &self.definition
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn collation(&self) -> Collation {
        self.definition.collation()
    }

    pub fn observers(&self) -> &ViewObserverRegistry {
        &self.observers
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ViewState {
        if self.updating.load(Ordering::SeqCst) {
            return ViewState::Updating;
        }
        let (empty, zero) = self
            .store
            .read()
            .map(|s| (s.is_empty(), s.update_sequence().is_zero()))
            .unwrap_or((true, true));
        if empty && zero {
            ViewState::Empty
        } else {
            ViewState::Loaded
        }
    }

    pub fn row_count(&self) -> usize {
        self.store.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn document_count(&self) -> usize {
        self.store.read().map(|s| s.document_count()).unwrap_or(0)
    }

    /// Feed position the index is consistent with.
    pub fn update_sequence(&self) -> UpdateSequence {
        self.store
            .read()
            .map(|s| s.update_sequence().clone())
            .unwrap_or_else(|_| UpdateSequence::zero())
    }

    pub fn have_document(&self, doc_id: &str) -> bool {
        self.store
            .read()
            .map(|s| s.contains_document(doc_id))
            .unwrap_or(false)
    }

    /// Body snapshot for a document, when the view keeps them.
    pub fn get_document(&self, doc_id: &str) -> Option<Value> {
        self.store
            .read()
            .ok()
            .and_then(|s| s.document(doc_id).cloned())
    }

    /// Value of the document's first emission.
    pub fn get_value(&self, doc_id: &str) -> Option<Value> {
        self.store
            .read()
            .ok()
            .and_then(|s| s.lookup_value(doc_id).cloned())
    }

    /// Start building a query against the current index.
    pub fn query(&self) -> ViewQuery<'_> {
        ViewQuery::new(self)
    }

    // ========================================================================
    // Direct index manipulation
    // ========================================================================

    /// Insert one row directly, bypassing the mapper. Returns whether
    /// the row was new; re-adding an identical (key, doc-id) pair is
    /// a no-op.
    pub fn add_document(&self, row: ViewRow) -> ViewResult<bool> {
        let (inserted, event) = {
            let mut store = self.write_store()?;
            let doc_id = row.doc_id.clone();
            let key = row.key.clone();
            let inserted = store.insert(row);
            let event = inserted.then(|| ViewChangeEvent::DocumentIndexed {
                doc_id,
                removed_keys: Vec::new(),
                added_keys: vec![key],
                update_sequence: store.update_sequence().clone(),
            });
            (inserted, event)
        };
        if let Some(event) = event {
            self.observers.notify(&event);
        }
        Ok(inserted)
    }

    /// Drop every row a document emitted. Returns whether anything
    /// was removed.
    pub fn erase_document(&self, doc_id: &str) -> ViewResult<bool> {
        let event = {
            let mut store = self.write_store()?;
            let removed = store.erase_document(doc_id);
            (!removed.is_empty()).then(|| ViewChangeEvent::DocumentIndexed {
                doc_id: doc_id.to_string(),
                removed_keys: removed,
                added_keys: Vec::new(),
                update_sequence: store.update_sequence().clone(),
            })
        };
        match event {
            Some(event) => {
                self.observers.notify(&event);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop all rows and forget the feed position.
    pub fn clear(&self) -> ViewResult<()> {
        let mut sync = self.lock_sync()?;
        {
            let mut store = self.write_store()?;
            store.clear();
        }
        sync.updates_since_checkpoint = 0;
        Logger::info("VIEW_CLEARED", &[("view", self.name())]);
        drop(sync);
        self.observers.notify(&ViewChangeEvent::Reset {
            update_sequence: UpdateSequence::zero(),
        });
        Ok(())
    }

    // ========================================================================
    // Synchronization
    // ========================================================================

    /// Replace the index with the server's current rows via one bulk
    /// query. Returns the number of rows loaded.
    pub fn load(&self, connection: &dyn Connection) -> ViewResult<usize> {
        let mut sync = self.lock_sync()?;
        let _updating = UpdatingGuard::raise(&self.updating);

        let result = connection.run_bulk_query(&self.definition)?;
        let sequence = result.update_sequence.clone();
        let loaded = {
            let mut store = self.write_store()?;
            store.replace_all(result.rows, result.update_sequence)
        };
        sync.updates_since_checkpoint = 0;
        Logger::info(
            "VIEW_LOADED",
            &[
                ("view", self.name()),
                ("rows", &loaded.to_string()),
                ("update_sequence", &sequence.to_string()),
            ],
        );
        drop(sync);
        self.observers.notify(&ViewChangeEvent::Reset {
            update_sequence: sequence,
        });
        Ok(loaded)
    }

    /// Fetch and apply change-feed entries since the current
    /// sequence. Returns the number of entries applied.
    pub fn update(&self, connection: &dyn Connection) -> ViewResult<usize> {
        let mut sync = self.lock_sync()?;
        let (applied, events) = self.run_update(&mut sync, connection)?;
        drop(sync);
        for event in &events {
            self.observers.notify(event);
        }
        Ok(applied)
    }

    /// Update only when the server's cached sequence says the view is
    /// stale. With `wait` off, a concurrent synchronization reports
    /// [`UpdateOutcome::InFlight`] instead of blocking.
    pub fn update_if_needed(
        &self,
        connection: &dyn Connection,
        wait: bool,
    ) -> ViewResult<UpdateOutcome> {
        let remote = connection.last_known_update_sequence()?;
        let local = self.read_store()?.update_sequence().clone();
        if local.is_current_for(&remote) {
            return Ok(UpdateOutcome::AlreadyCurrent);
        }

        let mut sync = if wait {
            self.lock_sync()?
        } else {
            match self.sync.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) => return Ok(UpdateOutcome::InFlight),
                Err(TryLockError::Poisoned(_)) => {
                    return Err(ViewError::Internal("sync lock poisoned".into()))
                }
            }
        };

        // Whoever held the lock may have caught us up already.
        let local = self.read_store()?.update_sequence().clone();
        if local.is_current_for(&remote) {
            return Ok(UpdateOutcome::AlreadyCurrent);
        }

        let (applied, events) = self.run_update(&mut sync, connection)?;
        drop(sync);
        for event in &events {
            self.observers.notify(event);
        }
        Ok(UpdateOutcome::Updated { applied })
    }

    /// Apply one pushed change-feed entry.
    pub fn on_change(&self, entry: &ChangeEntry) -> ViewResult<()> {
        let mut sync = self.lock_sync()?;
        let _updating = UpdatingGuard::raise(&self.updating);

        let sequence = match &entry.seq {
            Some(seq) => seq.clone(),
            None => self.read_store()?.update_sequence().clone(),
        };
        let event = self.apply_change(entry, &sequence)?;
        if let Some(seq) = &entry.seq {
            let mut store = self.write_store()?;
            if store.update_sequence() < seq {
                store.set_update_sequence(seq.clone());
            }
        }
        sync.updates_since_checkpoint += 1;
        self.maybe_checkpoint(&mut sync);
        drop(sync);
        self.observers.notify(&event);
        Ok(())
    }

    // ========================================================================
    // Checkpoints
    // ========================================================================

    /// Attach a checkpoint store. `save_interval` is the number of
    /// applied updates between automatic writes; zero disables them.
    pub fn set_checkpoint_store(
        &self,
        store: Box<dyn CheckpointStore>,
        schema_tag: impl Into<String>,
        save_interval: usize,
    ) -> ViewResult<()> {
        let mut sync = self.lock_sync()?;
        sync.checkpoint = Some(CheckpointConfig {
            store,
            schema_tag: schema_tag.into(),
            save_interval,
        });
        Ok(())
    }

    /// Attach a file-backed checkpoint store.
    pub fn set_checkpoint_file(
        &self,
        path: impl AsRef<std::path::Path>,
        schema_tag: impl Into<String>,
        save_interval: usize,
    ) -> ViewResult<()> {
        self.set_checkpoint_store(
            Box::new(FileCheckpointStore::new(path)),
            schema_tag,
            save_interval,
        )
    }

    /// Write a checkpoint now.
    pub fn make_checkpoint(&self) -> ViewResult<()> {
        let mut sync = self.lock_sync()?;
        self.write_checkpoint(&mut sync)
    }

    /// Load the configured checkpoint into the view. A missing blob
    /// leaves the view untouched; a rejected blob or stale schema tag
    /// resets it to empty so the next update resyncs from scratch.
    pub fn restore_from_checkpoint(&self) -> ViewResult<RestoreOutcome> {
        let mut sync = self.lock_sync()?;
        let (bytes, expected_tag) = {
            let config = sync
                .checkpoint
                .as_ref()
                .ok_or_else(|| ViewError::NoCheckpointStore(self.name().to_string()))?;
            (config.store.load()?, config.schema_tag.clone())
        };
        let Some(bytes) = bytes else {
            return Ok(RestoreOutcome::Missing);
        };

        let state = match checkpoint::decode(&bytes) {
            Ok(state) if state.schema_tag == expected_tag => state,
            Ok(state) => {
                Logger::warn(
                    "CHECKPOINT_REJECTED",
                    &[
                        ("view", self.name()),
                        ("reason", "schema_tag_mismatch"),
                        ("found_tag", &state.schema_tag),
                        ("expected_tag", &expected_tag),
                    ],
                );
                return self.discard_checkpoint(sync, "schema_tag_mismatch");
            }
            Err(reject) => {
                Logger::warn(
                    "CHECKPOINT_REJECTED",
                    &[("view", self.name()), ("reason", reject.as_str())],
                );
                return self.discard_checkpoint(sync, reject.as_str());
            }
        };

        let sequence = state.update_sequence.clone();
        let restored = {
            let mut store = self.write_store()?;
            store.replace_all(state.rows, state.update_sequence)
        };
        sync.updates_since_checkpoint = 0;
        Logger::info(
            "CHECKPOINT_RESTORED",
            &[
                ("view", self.name()),
                ("rows", &restored.to_string()),
                ("update_sequence", &sequence.to_string()),
            ],
        );
        drop(sync);
        self.observers.notify(&ViewChangeEvent::Reset {
            update_sequence: sequence,
        });
        Ok(RestoreOutcome::Restored { rows: restored })
    }

    // ========================================================================
    // Internals
    // ========================================================================

    pub(crate) fn read_store(&self) -> ViewResult<RwLockReadGuard<'_, RowStore>> {
        self.store
            .read()
            .map_err(|_| ViewError::Internal("row store lock poisoned".into()))
    }

    fn write_store(&self) -> ViewResult<RwLockWriteGuard<'_, RowStore>> {
        self.store
            .write()
            .map_err(|_| ViewError::Internal("row store lock poisoned".into()))
    }

    fn lock_sync(&self) -> ViewResult<MutexGuard<'_, SyncState>> {
        self.sync
            .lock()
            .map_err(|_| ViewError::Internal("sync lock poisoned".into()))
    }

    /// Fetch once and apply the whole batch. Caller holds the sync
    /// lock and delivers the returned events after releasing it.
    fn run_update(
        &self,
        sync: &mut SyncState,
        connection: &dyn Connection,
    ) -> ViewResult<(usize, Vec<ViewChangeEvent>)> {
        let _updating = UpdatingGuard::raise(&self.updating);

        let since = self.read_store()?.update_sequence().clone();
        let batch = connection.fetch_changes_since(&since)?;

        let mut events = Vec::with_capacity(batch.entries.len());
        for entry in &batch.entries {
            let sequence = entry.seq.clone().unwrap_or_else(|| batch.update_sequence.clone());
            events.push(self.apply_change(entry, &sequence)?);
        }
        // The batch sequence covers all entries; set it only after
        // every one is applied.
        {
            let mut store = self.write_store()?;
            store.set_update_sequence(batch.update_sequence.clone());
        }
        let applied = batch.entries.len();
        sync.updates_since_checkpoint += applied;
        Logger::info(
            "VIEW_UPDATED",
            &[
                ("view", self.name()),
                ("applied", &applied.to_string()),
                ("update_sequence", &batch.update_sequence.to_string()),
            ],
        );
        self.maybe_checkpoint(sync);
        Ok((applied, events))
    }

    /// Re-index one document: erase its old rows, run the mapper,
    /// insert the new rows. Erase comes first so a panicking mapper
    /// leaves the document un-indexed rather than stale.
    fn apply_change(
        &self,
        entry: &ChangeEntry,
        sequence: &UpdateSequence,
    ) -> ViewResult<ViewChangeEvent> {
        let removed_keys = {
            let mut store = self.write_store()?;
            store.erase_document(&entry.id)
        };

        // Mapper runs with no lock held.
        let emissions = if entry.deleted {
            Vec::new()
        } else {
            let body = entry.body.clone().unwrap_or(Value::Null);
            self.definition
                .map_document(&SourceDocument::new(entry.id.clone(), body))
        };

        let keep_doc = self.definition.keeps_documents() && !entry.deleted;
        let mut added_keys = Vec::with_capacity(emissions.len());
        {
            let mut store = self.write_store()?;
            for (key, value) in emissions {
                let mut row = ViewRow::new(entry.id.clone(), key.clone(), value);
                if keep_doc {
                    if let Some(body) = &entry.body {
                        row = row.with_doc(body.clone());
                    }
                }
                if store.insert(row) {
                    added_keys.push(key);
                }
            }
        }

        Ok(ViewChangeEvent::DocumentIndexed {
            doc_id: entry.id.clone(),
            removed_keys,
            added_keys,
            update_sequence: sequence.clone(),
        })
    }

    /// Write a checkpoint when the interval says one is due. Interval
    /// failures are logged, not propagated: the update that triggered
    /// them already succeeded.
    fn maybe_checkpoint(&self, sync: &mut SyncState) {
        let due = sync
            .checkpoint
            .as_ref()
            .map(|c| c.save_interval > 0 && sync.updates_since_checkpoint >= c.save_interval)
            .unwrap_or(false);
        if !due {
            return;
        }
        if let Err(e) = self.write_checkpoint(sync) {
            Logger::error(
                "CHECKPOINT_FAILED",
                &[("view", self.name()), ("error", &e.to_string())],
            );
        }
    }

    /// Encode under a read lock, then persist outside it. Queries
    /// only block for the encoding snapshot, never for I/O.
    fn write_checkpoint(&self, sync: &mut SyncState) -> ViewResult<()> {
        let config = sync
            .checkpoint
            .as_ref()
            .ok_or_else(|| ViewError::NoCheckpointStore(self.name().to_string()))?;
        let (bytes, sequence) = {
            let store = self.read_store()?;
            let bytes = checkpoint::encode(&store, &config.schema_tag)?;
            (bytes, store.update_sequence().clone())
        };
        config.store.save(&bytes)?;
        sync.updates_since_checkpoint = 0;
        Logger::info(
            "CHECKPOINT_WRITTEN",
            &[
                ("view", self.name()),
                ("bytes", &bytes.len().to_string()),
                ("update_sequence", &sequence.to_string()),
            ],
        );
        Ok(())
    }

    /// Reset to empty after rejecting a checkpoint, forcing the next
    /// synchronization to start from the beginning.
    fn discard_checkpoint(
        &self,
        mut sync: MutexGuard<'_, SyncState>,
        reason: &'static str,
    ) -> ViewResult<RestoreOutcome> {
        {
            let mut store = self.write_store()?;
            store.clear();
        }
        sync.updates_since_checkpoint = 0;
        drop(sync);
        self.observers.notify(&ViewChangeEvent::Reset {
            update_sequence: UpdateSequence::zero(),
        });
        Ok(RestoreOutcome::Discarded { reason })
    }

    /// Reduce the rows of one group without materializing a full
    /// query. `None` when the group has no rows.
    pub(crate) fn reduce_group_value(
        &self,
        group_key: &Value,
        level: GroupLevel,
    ) -> ViewResult<Option<Value>> {
        let reduce = self
            .definition
            .reduce_fn()
            .ok_or_else(|| ViewError::MissingReduce(self.name().to_string()))?;

        let store = self.read_store()?;
        let collation = store.collation();
        let mut keys: Vec<Value> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        let mut collect = |row: &ViewRow| {
            keys.push(row.key.clone());
            values.push(row.value.clone());
        };
        if collation == Collation::Raw {
            store
                .iter()
                .filter(|row| {
                    collation.compare(&level.truncate(&row.key), group_key)
                        == std::cmp::Ordering::Equal
                })
                .for_each(&mut collect);
        } else {
            // Rows truncating to the group key form one contiguous
            // run starting at the group key itself.
            let lower = std::ops::Bound::Included(crate::collation::CompositeKey::lower(
                group_key.clone(),
                collation,
            ));
            store
                .scan_from(lower)
                .take_while(|row| {
                    collation.compare(&level.truncate(&row.key), group_key)
                        == std::cmp::Ordering::Equal
                })
                .for_each(&mut collect);
        }
        drop(store);

        if keys.is_empty() {
            return Ok(None);
        }
        Ok(Some(reduce(&keys, &values, false)))
    }
}

impl std::fmt::Debug for MemView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemView")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("rows", &self.row_count())
            .finish()
    }
}
