//! Ordered row store
//!
//! Holds the materialized index for one view: every row produced by
//! mapping, ordered by composite key, plus a reverse map from document
//! id to that document's emitted keys. The reverse map makes
//! re-indexing a changed document cheap: its old rows are found by id,
//! not by scanning.
//!
//! Invariant: for every document id, the reverse map's key list names
//! exactly the composite keys present in the forward index for that
//! id, in emission order.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use serde_json::Value;

use crate::collation::{Collation, CompositeKey, DocIdBound};
use crate::connection::UpdateSequence;

use super::row::ViewRow;

/// Materialized index rows for one view.
#[derive(Debug)]
pub struct RowStore {
    collation: Collation,
    rows: BTreeMap<CompositeKey, ViewRow>,
    doc_keys: HashMap<String, Vec<Value>>,
    update_sequence: UpdateSequence,
}

impl RowStore {
    pub fn new(collation: Collation) -> Self {
        RowStore {
            collation,
            rows: BTreeMap::new(),
            doc_keys: HashMap::new(),
            update_sequence: UpdateSequence::zero(),
        }
    }

    pub fn collation(&self) -> Collation {
        self.collation
    }

    /// Number of rows (not documents) in the index.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of documents with at least one row.
    pub fn document_count(&self) -> usize {
        self.doc_keys.len()
    }

    pub fn update_sequence(&self) -> &UpdateSequence {
        &self.update_sequence
    }

    pub fn set_update_sequence(&mut self, seq: UpdateSequence) {
        self.update_sequence = seq;
    }

    /// Insert one row. Re-inserting an existing (key, doc-id) pair is
    /// a no-op; returns whether the row was actually added.
    pub fn insert(&mut self, row: ViewRow) -> bool {
        let composite = CompositeKey::new(
            row.key.clone(),
            DocIdBound::from(row.doc_id.clone()),
            self.collation,
        );
        if self.rows.contains_key(&composite) {
            return false;
        }
        self.doc_keys
            .entry(row.doc_id.clone())
            .or_default()
            .push(row.key.clone());
        self.rows.insert(composite, row);
        true
    }

    /// Remove every row emitted by `doc_id`. Returns the removed keys
    /// in emission order; empty when the document was not indexed.
    pub fn erase_document(&mut self, doc_id: &str) -> Vec<Value> {
        let Some(keys) = self.doc_keys.remove(doc_id) else {
            return Vec::new();
        };
        for key in &keys {
            let composite =
                CompositeKey::new(key.clone(), DocIdBound::from(doc_id), self.collation);
            self.rows.remove(&composite);
        }
        keys
    }

    pub fn contains_document(&self, doc_id: &str) -> bool {
        self.doc_keys.contains_key(doc_id)
    }

    /// Keys emitted by one document, in emission order.
    pub fn keys_for_document(&self, doc_id: &str) -> Option<&[Value]> {
        self.doc_keys.get(doc_id).map(Vec::as_slice)
    }

    /// Value of the document's first emission, if any.
    pub fn lookup_value(&self, doc_id: &str) -> Option<&Value> {
        let keys = self.doc_keys.get(doc_id)?;
        let first = keys.first()?;
        let composite =
            CompositeKey::new(first.clone(), DocIdBound::from(doc_id), self.collation);
        self.rows.get(&composite).map(|row| &row.value)
    }

    /// Body snapshot kept for the document, if any row carries one.
    pub fn document(&self, doc_id: &str) -> Option<&Value> {
        let keys = self.doc_keys.get(doc_id)?;
        keys.iter().find_map(|key| {
            let composite =
                CompositeKey::new(key.clone(), DocIdBound::from(doc_id), self.collation);
            self.rows.get(&composite).and_then(|row| row.doc.as_ref())
        })
    }

    /// All rows in composite-key order.
    pub fn iter(&self) -> impl Iterator<Item = &ViewRow> {
        self.rows.values()
    }

    /// Rows starting at `lower`, in composite-key order.
    pub fn scan_from(&self, lower: Bound<CompositeKey>) -> impl Iterator<Item = &ViewRow> {
        self.rows.range((lower, Bound::Unbounded)).map(|(_, row)| row)
    }

    /// Rows inside the given bounds, in composite-key order. An
    /// inverted range is empty, not an error.
    pub fn scan_range(
        &self,
        lower: Bound<CompositeKey>,
        upper: Bound<CompositeKey>,
    ) -> Vec<&ViewRow> {
        if Self::range_is_empty(&lower, &upper) {
            return Vec::new();
        }
        self.rows.range((lower, upper)).map(|(_, row)| row).collect()
    }

    /// Every row whose key collates equal to `key`.
    pub fn rows_for_key(&self, key: &Value) -> Vec<&ViewRow> {
        self.scan_range(
            Bound::Included(CompositeKey::lower(key.clone(), self.collation)),
            Bound::Included(CompositeKey::upper(key.clone(), self.collation)),
        )
    }

    /// Drop every row and reset the sequence to the beginning.
    pub fn clear(&mut self) {
        self.rows.clear();
        self.doc_keys.clear();
        self.update_sequence = UpdateSequence::zero();
    }

    /// Replace the whole index with `rows` at `seq`. Returns the
    /// number of rows kept (duplicates collapse).
    pub fn replace_all(&mut self, rows: Vec<ViewRow>, seq: UpdateSequence) -> usize {
        self.clear();
        let mut inserted = 0;
        for row in rows {
            if self.insert(row) {
                inserted += 1;
            }
        }
        self.update_sequence = seq;
        inserted
    }

    /// BTreeMap::range panics on inverted bounds; detect them up
    /// front so bad query arguments degrade to an empty result.
    fn range_is_empty(lower: &Bound<CompositeKey>, upper: &Bound<CompositeKey>) -> bool {
        let (l, l_inclusive) = match lower {
            Bound::Included(k) => (k, true),
            Bound::Excluded(k) => (k, false),
            Bound::Unbounded => return false,
        };
        let (u, u_inclusive) = match upper {
            Bound::Included(k) => (k, true),
            Bound::Excluded(k) => (k, false),
            Bound::Unbounded => return false,
        };
        match l.cmp(u) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => !l_inclusive || !u_inclusive,
            std::cmp::Ordering::Less => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with(rows: Vec<ViewRow>) -> RowStore {
        let mut store = RowStore::new(Collation::Canonical);
        for row in rows {
            store.insert(row);
        }
        store
    }

    #[test]
    fn test_rows_iterate_in_collation_order() {
        let store = store_with(vec![
            ViewRow::new("d3", json!("b"), json!(1)),
            ViewRow::new("d1", json!([1, 2]), json!(2)),
            ViewRow::new("d2", json!(null), json!(3)),
            ViewRow::new("d4", json!(7), json!(4)),
        ]);

        let keys: Vec<&Value> = store.iter().map(|r| &r.key).collect();
        assert_eq!(keys, vec![&json!(null), &json!(7), &json!("b"), &json!([1, 2])]);
    }

    #[test]
    fn test_duplicate_keys_order_by_doc_id() {
        let store = store_with(vec![
            ViewRow::new("zz", json!("dup"), json!(1)),
            ViewRow::new("aa", json!("dup"), json!(2)),
            ViewRow::new("mm", json!("dup"), json!(3)),
        ]);

        let ids: Vec<&str> = store.iter().map(|r| r.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["aa", "mm", "zz"]);
    }

    #[test]
    fn test_insert_identical_pair_is_noop() {
        let mut store = store_with(vec![ViewRow::new("d1", json!("k"), json!(1))]);
        assert!(!store.insert(ViewRow::new("d1", json!("k"), json!(99))));
        assert_eq!(store.len(), 1);
        // First value wins; the duplicate insert changed nothing.
        assert_eq!(store.lookup_value("d1"), Some(&json!(1)));
        assert_eq!(store.keys_for_document("d1").map(|k| k.len()), Some(1));
    }

    #[test]
    fn test_same_doc_distinct_keys_all_kept() {
        let store = store_with(vec![
            ViewRow::new("d1", json!("a"), json!(1)),
            ViewRow::new("d1", json!("b"), json!(2)),
        ]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.document_count(), 1);
    }

    #[test]
    fn test_erase_document_removes_all_its_rows() {
        let mut store = store_with(vec![
            ViewRow::new("d1", json!("a"), json!(1)),
            ViewRow::new("d1", json!("b"), json!(2)),
            ViewRow::new("d2", json!("a"), json!(3)),
        ]);

        let removed = store.erase_document("d1");
        assert_eq!(removed, vec![json!("a"), json!("b")]);
        assert_eq!(store.len(), 1);
        assert!(!store.contains_document("d1"));
        assert!(store.contains_document("d2"));
        assert_eq!(store.lookup_value("d2"), Some(&json!(3)));
    }

    #[test]
    fn test_erase_unknown_document_is_noop() {
        let mut store = store_with(vec![ViewRow::new("d1", json!("a"), json!(1))]);
        assert!(store.erase_document("ghost").is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_lookup_value_uses_first_emission() {
        let store = store_with(vec![
            ViewRow::new("d1", json!("z-first"), json!("first")),
            ViewRow::new("d1", json!("a-second"), json!("second")),
        ]);
        // Emission order decides, not collation order.
        assert_eq!(store.lookup_value("d1"), Some(&json!("first")));
    }

    #[test]
    fn test_document_snapshot_round_trip() {
        let body = json!({"type": "user", "name": "ada"});
        let store = store_with(vec![
            ViewRow::new("d1", json!("k"), json!(null)).with_doc(body.clone())
        ]);
        assert_eq!(store.document("d1"), Some(&body));
        assert_eq!(store.document("d2"), None);
    }

    #[test]
    fn test_inverted_range_is_empty_not_panic() {
        let store = store_with(vec![
            ViewRow::new("d1", json!(1), json!(null)),
            ViewRow::new("d2", json!(2), json!(null)),
        ]);
        let lower = Bound::Included(CompositeKey::lower(json!(5), Collation::Canonical));
        let upper = Bound::Included(CompositeKey::upper(json!(1), Collation::Canonical));
        assert!(store.scan_range(lower, upper).is_empty());
    }

    #[test]
    fn test_rows_for_key_matches_numeric_representations() {
        let store = store_with(vec![
            ViewRow::new("d1", json!(3), json!(null)),
            ViewRow::new("d2", json!(3.0), json!(null)),
            ViewRow::new("d3", json!(4), json!(null)),
        ]);
        let rows = store.rows_for_key(&json!(3));
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_replace_all_resets_previous_contents() {
        let mut store = store_with(vec![ViewRow::new("old", json!("x"), json!(1))]);
        let inserted = store.replace_all(
            vec![
                ViewRow::new("new1", json!("a"), json!(1)),
                ViewRow::new("new2", json!("b"), json!(2)),
            ],
            UpdateSequence::from(42),
        );
        assert_eq!(inserted, 2);
        assert!(!store.contains_document("old"));
        assert_eq!(store.update_sequence(), &UpdateSequence::from(42));
    }

    #[test]
    fn test_clear_resets_sequence_to_zero() {
        let mut store = store_with(vec![ViewRow::new("d1", json!("k"), json!(1))]);
        store.set_update_sequence(UpdateSequence::from(9));
        store.clear();
        assert!(store.is_empty());
        assert!(store.update_sequence().is_zero());
    }

    #[test]
    fn test_insertion_order_does_not_change_index() {
        let rows = vec![
            ViewRow::new("d1", json!([1, "a"]), json!(1)),
            ViewRow::new("d2", json!(null), json!(2)),
            ViewRow::new("d3", json!([1]), json!(3)),
            ViewRow::new("d4", json!("s"), json!(4)),
        ];
        let forward = store_with(rows.clone());
        let mut reversed_input = rows;
        reversed_input.reverse();
        let backward = store_with(reversed_input);

        let a: Vec<&ViewRow> = forward.iter().collect();
        let b: Vec<&ViewRow> = backward.iter().collect();
        assert_eq!(a, b);
    }
}
