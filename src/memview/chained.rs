//! Chained reduce views
//!
//! A [`ChainedReduceView`] keeps the grouped reduce results of a base
//! view materialized, refreshed incrementally as the base view
//! indexes documents. Instead of re-running a grouped query per read,
//! callers read the cached aggregates; only the groups a change
//! actually touched get recomputed.

use std::sync::{Arc, RwLock, Weak};

use serde_json::Value;

use crate::observability::Logger;

use super::errors::{ViewError, ViewResult};
use super::observer::ViewChangeEvent;
use super::reduce::GroupLevel;
use super::view::MemView;

struct ChainedState {
    base: Arc<MemView>,
    level: GroupLevel,
    /// Group keys with their reduced values, sorted by the base
    /// view's collation. Keys are unique.
    groups: RwLock<Vec<(Value, Value)>>,
}

/// Materialized grouped aggregates over a reducing view.
///
/// Holds an observer subscription on the base view for its whole
/// lifetime; dropping the chained view detaches it.
pub struct ChainedReduceView {
    state: Arc<ChainedState>,
    subscription: String,
}

impl ChainedReduceView {
    /// Build the aggregate cache and subscribe to the base view's
    /// changes. Fails when the base view has no reduce function.
    pub fn attach(base: Arc<MemView>, level: GroupLevel) -> ViewResult<ChainedReduceView> {
        if !base.definition().has_reduce() {
            return Err(ViewError::MissingReduce(base.name().to_string()));
        }
        let state = Arc::new(ChainedState {
            base: Arc::clone(&base),
            level,
            groups: RwLock::new(Vec::new()),
        });

        // Subscribe before the initial build so no event slips
        // between the two; a redundant refresh is harmless.
        let weak: Weak<ChainedState> = Arc::downgrade(&state);
        let subscription = base.observers().subscribe(move |event| {
            if let Some(state) = weak.upgrade() {
                state.apply_event(event);
            }
        });
        state.rebuild()?;

        Ok(ChainedReduceView {
            state,
            subscription,
        })
    }

    pub fn base(&self) -> &MemView {
        &self.state.base
    }

    pub fn level(&self) -> GroupLevel {
        self.state.level
    }

    /// Number of non-empty groups.
    pub fn len(&self) -> usize {
        self.state.groups.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all (group key, reduced value) pairs in collation
    /// order.
    pub fn aggregates(&self) -> Vec<(Value, Value)> {
        self.state
            .groups
            .read()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    /// Reduced value for one group key.
    pub fn aggregate_for(&self, group_key: &Value) -> Option<Value> {
        let collation = self.state.base.collation();
        let groups = self.state.groups.read().ok()?;
        groups
            .binary_search_by(|(key, _)| collation.compare(key, group_key))
            .ok()
            .map(|i| groups[i].1.clone())
    }

    /// Recompute every group from the base view's current rows.
    pub fn refresh(&self) -> ViewResult<()> {
        self.state.rebuild()
    }

    /// Drop the subscription on the base view.
    pub fn detach(self) {}
}

impl Drop for ChainedReduceView {
    fn drop(&mut self) {
        self.state
            .base
            .observers()
            .unsubscribe(&self.subscription);
    }
}

impl std::fmt::Debug for ChainedReduceView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainedReduceView")
            .field("base", &self.state.base.name())
            .field("level", &self.state.level)
            .field("groups", &self.len())
            .finish()
    }
}

impl ChainedState {
    fn apply_event(&self, event: &ViewChangeEvent) {
        let outcome = match event {
            ViewChangeEvent::Reset { .. } => self.rebuild(),
            ViewChangeEvent::DocumentIndexed {
                removed_keys,
                added_keys,
                ..
            } => self.refresh_touched(removed_keys.iter().chain(added_keys)),
        };
        if let Err(e) = outcome {
            Logger::warn(
                "CHAINED_REDUCE_STALE",
                &[("view", self.base.name()), ("error", &e.to_string())],
            );
        }
    }

    /// Recompute only the groups the changed row keys fall into.
    fn refresh_touched<'a>(
        &self,
        row_keys: impl Iterator<Item = &'a Value>,
    ) -> ViewResult<()> {
        let collation = self.base.collation();
        let mut touched: Vec<Value> = Vec::new();
        for key in row_keys {
            let group_key = self.level.truncate(key);
            match touched.binary_search_by(|k| collation.compare(k, &group_key)) {
                Ok(_) => {}
                Err(i) => touched.insert(i, group_key),
            }
        }
        for group_key in touched {
            self.refresh_group(&group_key)?;
        }
        Ok(())
    }

    /// Re-reduce one group and splice the result into the cache. A
    /// group with no rows left disappears.
    fn refresh_group(&self, group_key: &Value) -> ViewResult<()> {
        let value = self.base.reduce_group_value(group_key, self.level)?;
        let collation = self.base.collation();
        let mut groups = self
            .groups
            .write()
            .map_err(|_| ViewError::Internal("group cache lock poisoned".into()))?;
        let position = groups.binary_search_by(|(key, _)| collation.compare(key, group_key));
        match (position, value) {
            (Ok(i), Some(value)) => groups[i].1 = value,
            (Ok(i), None) => {
                groups.remove(i);
            }
            (Err(i), Some(value)) => groups.insert(i, (group_key.clone(), value)),
            (Err(_), None) => {}
        }
        Ok(())
    }

    /// Full recompute: bucket rows by truncated key, then reduce
    /// each bucket.
    fn rebuild(&self) -> ViewResult<()> {
        let computed = {
            let store = self.base.read_store()?;
            let collation = store.collation();
            let mut buckets: Vec<(Value, Vec<Value>, Vec<Value>)> = Vec::new();
            for row in store.iter() {
                let group_key = self.level.truncate(&row.key);
                match buckets.binary_search_by(|(key, _, _)| collation.compare(key, &group_key)) {
                    Ok(i) => {
                        buckets[i].1.push(row.key.clone());
                        buckets[i].2.push(row.value.clone());
                    }
                    Err(i) => {
                        buckets.insert(i, (group_key, vec![row.key.clone()], vec![row.value.clone()]))
                    }
                }
            }
            let reduce = self
                .base
                .definition()
                .reduce_fn()
                .ok_or_else(|| ViewError::MissingReduce(self.base.name().to_string()))?;
            buckets
                .into_iter()
                .map(|(key, keys, values)| {
                    let reduced = reduce(&keys, &values, false);
                    (key, reduced)
                })
                .collect::<Vec<(Value, Value)>>()
        };
        let mut groups = self
            .groups
            .write()
            .map_err(|_| ViewError::Internal("group cache lock poisoned".into()))?;
        *groups = computed;
        Ok(())
    }
}
