//! Composite keys for the ordered row index
//!
//! A composite key pairs an emitted view key with the emitting
//! document's id. Rows sort by key under the view's collation, then by
//! document id, so duplicate keys from different documents stay
//! distinct and deterministically ordered.
//!
//! Range bounds use two doc-id sentinels: the empty id sorts before
//! any real id sharing the same key, and [`DocIdBound::Max`] sorts
//! after all of them. Together they let a key-only bound select the
//! full run of rows for that key.

use std::cmp::Ordering;

use serde_json::Value;

use super::order::Collation;

/// Document-id component of a composite key.
///
/// Stored rows always carry [`DocIdBound::Id`]; [`DocIdBound::Max`]
/// exists only to form upper range bounds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum DocIdBound {
    /// A concrete document id. The empty string doubles as the minimal
    /// sentinel.
    Id(String),
    /// Sorts after every document id.
    Max,
}

impl DocIdBound {
    /// Sentinel that sorts before any real document id.
    pub fn min() -> Self {
        DocIdBound::Id(String::new())
    }

    /// The concrete id, if this bound is one.
    pub fn as_id(&self) -> Option<&str> {
        match self {
            DocIdBound::Id(id) => Some(id),
            DocIdBound::Max => None,
        }
    }
}

impl From<&str> for DocIdBound {
    fn from(id: &str) -> Self {
        DocIdBound::Id(id.to_string())
    }
}

impl From<String> for DocIdBound {
    fn from(id: String) -> Self {
        DocIdBound::Id(id)
    }
}

/// Ordered index key: emitted view key plus document id.
///
/// Carries the collation it was built under so the ordered map can
/// compare keys without outside context. All keys in one store share
/// one collation.
#[derive(Debug, Clone)]
pub struct CompositeKey {
    key: Value,
    doc_id: DocIdBound,
    collation: Collation,
}

impl CompositeKey {
    pub fn new(key: Value, doc_id: DocIdBound, collation: Collation) -> Self {
        CompositeKey {
            key,
            doc_id,
            collation,
        }
    }

    /// Lower bound for a key: before every row with this key.
    pub fn lower(key: Value, collation: Collation) -> Self {
        CompositeKey::new(key, DocIdBound::min(), collation)
    }

    /// Upper bound for a key: after every row with this key.
    pub fn upper(key: Value, collation: Collation) -> Self {
        CompositeKey::new(key, DocIdBound::Max, collation)
    }

    pub fn key(&self) -> &Value {
        &self.key
    }

    pub fn doc_id(&self) -> &DocIdBound {
        &self.doc_id
    }
}

impl PartialEq for CompositeKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CompositeKey {}

impl PartialOrd for CompositeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CompositeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.collation
            .compare(&self.key, &other.key)
            .then_with(|| self.doc_id.cmp(&other.doc_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(k: Value, id: &str) -> CompositeKey {
        CompositeKey::new(k, DocIdBound::from(id), Collation::Canonical)
    }

    #[test]
    fn test_key_orders_before_doc_id() {
        assert!(key(json!(1), "zzz") < key(json!(2), "aaa"));
        assert!(key(json!("a"), "doc1") < key(json!("b"), "doc0"));
    }

    #[test]
    fn test_doc_id_breaks_ties() {
        assert!(key(json!("dup"), "doc1") < key(json!("dup"), "doc2"));
        assert_eq!(key(json!("dup"), "doc1"), key(json!("dup"), "doc1"));
    }

    #[test]
    fn test_sentinels_bracket_real_ids() {
        let k = json!("k");
        let lower = CompositeKey::lower(k.clone(), Collation::Canonical);
        let upper = CompositeKey::upper(k.clone(), Collation::Canonical);
        let real = key(k, "any-doc");
        assert!(lower < real);
        assert!(real < upper);
    }

    #[test]
    fn test_upper_sentinel_stays_below_next_key() {
        let upper = CompositeKey::upper(json!(1), Collation::Canonical);
        let next = key(json!(2), "");
        assert!(upper < next);
    }

    #[test]
    fn test_equal_numeric_keys_collapse() {
        // 3 and 3.0 collate equal, so the same doc id makes equal keys.
        assert_eq!(key(json!(3), "d"), key(json!(3.0), "d"));
    }
}
