//! Query execution
//!
//! Queries run entirely against the local row store under a read
//! lock; no network is involved. A builder collects the request, the
//! executor resolves it in a fixed pipeline: select rows, apply
//! direction, group and reduce, count, then skip and limit, then the
//! view's post-processing hook.

use std::cmp::Ordering;
use std::ops::Bound;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collation::{collate, Collation, CompositeKey, DocIdBound};

use super::adapter::ViewDefinition;
use super::errors::{ViewError, ViewResult};
use super::reduce::{group_rows, reduce_group, GroupLevel};
use super::row::ViewRow;
use super::store::RowStore;
use super::view::MemView;

/// One row of a query result.
///
/// Plain queries carry the emitting document's id (and body, when the
/// view keeps them); reduced queries carry only group key and value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRow {
    pub key: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
}

impl QueryRow {
    fn from_view_row(row: &ViewRow) -> Self {
        QueryRow {
            key: row.key.clone(),
            id: Some(row.doc_id.clone()),
            value: row.value.clone(),
            doc: row.doc.clone(),
        }
    }

    fn reduced(key: Value, value: Value) -> Self {
        QueryRow {
            key,
            id: None,
            value,
            doc: None,
        }
    }
}

/// Result envelope: the rows plus the match count before skip and
/// limit were applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub total_rows: usize,
    pub rows: Vec<QueryRow>,
}

/// Collected query parameters, resolved at run time.
#[derive(Debug, Clone, Default)]
pub(crate) struct QuerySpec {
    pub keys: Option<Vec<Value>>,
    pub array_prefix: Option<Vec<Value>>,
    pub string_prefix: Option<Value>,
    pub start_key: Option<Value>,
    pub end_key: Option<Value>,
    pub start_doc_id: Option<String>,
    pub end_doc_id: Option<String>,
    pub exclusive_end: bool,
    pub descending: bool,
    pub skip: usize,
    pub limit: Option<usize>,
    pub reduce: Option<bool>,
    pub group_level: Option<GroupLevel>,
}

/// Builder for one query against a view.
///
/// Selection modes are exclusive; when several are set, explicit keys
/// win over prefixes, and prefixes win over range bounds.
#[derive(Debug)]
pub struct ViewQuery<'a> {
    view: &'a MemView,
    spec: QuerySpec,
}

impl<'a> ViewQuery<'a> {
    pub(crate) fn new(view: &'a MemView) -> Self {
        ViewQuery {
            view,
            spec: QuerySpec::default(),
        }
    }

    /// Match exactly one key.
    pub fn key(self, key: Value) -> Self {
        self.keys(vec![key])
    }

    /// Match each listed key; result order follows the list.
    pub fn keys(mut self, keys: Vec<Value>) -> Self {
        self.spec.keys = Some(keys);
        self
    }

    /// Match array keys that extend `parts` by at least one element.
    pub fn array_prefix(mut self, parts: Vec<Value>) -> Self {
        self.spec.array_prefix = Some(parts);
        self
    }

    /// Match keys whose trailing string starts with the trailing
    /// string of `prefix`. Accepts a bare string or an array ending
    /// in a string.
    pub fn string_prefix(mut self, prefix: Value) -> Self {
        self.spec.string_prefix = Some(prefix);
        self
    }

    /// Lower range bound (inclusive).
    pub fn start_key(mut self, key: Value) -> Self {
        self.spec.start_key = Some(key);
        self
    }

    /// Upper range bound; inclusive unless [`exclusive_end`] is set.
    ///
    /// [`exclusive_end`]: ViewQuery::exclusive_end
    pub fn end_key(mut self, key: Value) -> Self {
        self.spec.end_key = Some(key);
        self
    }

    /// Refine the lower bound inside its key's run of doc ids.
    pub fn start_doc_id(mut self, doc_id: impl Into<String>) -> Self {
        self.spec.start_doc_id = Some(doc_id.into());
        self
    }

    /// Refine the upper bound inside its key's run of doc ids.
    pub fn end_doc_id(mut self, doc_id: impl Into<String>) -> Self {
        self.spec.end_doc_id = Some(doc_id.into());
        self
    }

    /// Exclude the end key (and end doc id) from the range.
    pub fn exclusive_end(mut self) -> Self {
        self.spec.exclusive_end = true;
        self
    }

    /// Reverse the result order. Grouping still merges the same rows.
    pub fn descending(mut self, descending: bool) -> Self {
        self.spec.descending = descending;
        self
    }

    /// Drop the first `n` rows after grouping.
    pub fn skip(mut self, n: usize) -> Self {
        self.spec.skip = n;
        self
    }

    /// Keep at most `n` rows after skip.
    pub fn limit(mut self, n: usize) -> Self {
        self.spec.limit = Some(n);
        self
    }

    /// Force reduction on or off. Defaults to on for views that
    /// define a reduce function.
    pub fn reduce(mut self, reduce: bool) -> Self {
        self.spec.reduce = Some(reduce);
        self
    }

    /// Grouping granularity for reduced queries. Defaults to one
    /// aggregate, or per-key grouping when several explicit keys are
    /// listed.
    pub fn group_level(mut self, level: GroupLevel) -> Self {
        self.spec.group_level = Some(level);
        self
    }

    /// Execute against the view's current rows.
    pub fn run(self) -> ViewResult<QueryResult> {
        let store = self.view.read_store()?;
        execute(&store, self.view.definition(), &self.spec)
    }
}

/// Run `spec` against `store`.
pub(crate) fn execute(
    store: &RowStore,
    definition: &ViewDefinition,
    spec: &QuerySpec,
) -> ViewResult<QueryResult> {
    let mut matched = select_rows(store, spec);
    if spec.descending {
        matched.reverse();
    }

    let reducing = spec.reduce.unwrap_or_else(|| definition.has_reduce());
    let rows: Vec<QueryRow> = if reducing {
        let reduce = definition
            .reduce_fn()
            .ok_or_else(|| ViewError::MissingReduce(definition.name().to_string()))?;
        let level = spec.group_level.unwrap_or_else(|| default_group_level(spec));
        group_rows(&matched, level, store.collation())
            .iter()
            .map(|group| QueryRow::reduced(group.key.clone(), reduce_group(reduce, group)))
            .collect()
    } else {
        matched.iter().map(|row| QueryRow::from_view_row(row)).collect()
    };

    let total_rows = rows.len();
    let mut rows: Vec<QueryRow> = rows.into_iter().skip(spec.skip).collect();
    if let Some(limit) = spec.limit {
        rows.truncate(limit);
    }
    if let Some(hook) = definition.post_process_fn() {
        rows = hook(rows);
    }

    Ok(QueryResult { total_rows, rows })
}

/// Several explicit keys group per key by default; everything else
/// collapses to a single aggregate.
fn default_group_level(spec: &QuerySpec) -> GroupLevel {
    match &spec.keys {
        Some(keys) if keys.len() > 1 => GroupLevel::Exact,
        _ => GroupLevel::Single,
    }
}

/// Resolve the selection mode and collect matching rows in ascending
/// collation order (key-list mode: in list order).
fn select_rows<'s>(store: &'s RowStore, spec: &QuerySpec) -> Vec<&'s ViewRow> {
    let collation = store.collation();

    if let Some(keys) = &spec.keys {
        let mut matched = Vec::new();
        for key in keys {
            matched.extend(store.rows_for_key(key));
        }
        return matched;
    }

    if let Some(parts) = &spec.array_prefix {
        // The run of extensions starts right after the bare prefix
        // array: its first element is the prefix plus a minimal
        // (null) element. Raw collation orders by JSON text, where
        // extensions are not contiguous, so it scans everything.
        if collation == Collation::Raw {
            return store.iter().filter(|row| array_extends(&row.key, parts)).collect();
        }
        let mut opened = parts.clone();
        opened.push(Value::Null);
        let lower = Bound::Included(CompositeKey::lower(Value::Array(opened), collation));
        return store
            .scan_from(lower)
            .take_while(|row| array_extends(&row.key, parts))
            .collect();
    }

    if let Some(prefix) = &spec.string_prefix {
        let Some(lower_key) = string_prefix_lower_key(prefix) else {
            // Not a string and not an array ending in one: nothing
            // can match.
            return Vec::new();
        };
        if collation == Collation::Raw {
            return store
                .iter()
                .filter(|row| matches_string_prefix(&row.key, prefix))
                .collect();
        }
        let lower = Bound::Included(CompositeKey::lower(lower_key, collation));
        return store
            .scan_from(lower)
            .take_while(|row| matches_string_prefix(&row.key, prefix))
            .collect();
    }

    if spec.start_key.is_none() && spec.end_key.is_none() {
        return store.iter().collect();
    }

    let lower = match &spec.start_key {
        Some(key) => {
            let doc_id = spec
                .start_doc_id
                .as_deref()
                .map(DocIdBound::from)
                .unwrap_or_else(DocIdBound::min);
            Bound::Included(CompositeKey::new(key.clone(), doc_id, collation))
        }
        None => Bound::Unbounded,
    };
    let upper = match &spec.end_key {
        Some(key) => {
            if spec.exclusive_end {
                // Excluding the bound row keeps every earlier doc id
                // at the same key.
                let doc_id = spec
                    .end_doc_id
                    .as_deref()
                    .map(DocIdBound::from)
                    .unwrap_or_else(DocIdBound::min);
                Bound::Excluded(CompositeKey::new(key.clone(), doc_id, collation))
            } else {
                let doc_id = spec
                    .end_doc_id
                    .as_deref()
                    .map(DocIdBound::from)
                    .unwrap_or(DocIdBound::Max);
                Bound::Included(CompositeKey::new(key.clone(), doc_id, collation))
            }
        }
        None => Bound::Unbounded,
    };
    store.scan_range(lower, upper)
}

/// True when `key` is an array strictly longer than `prefix` whose
/// leading elements collate equal to it.
fn array_extends(key: &Value, prefix: &[Value]) -> bool {
    let Value::Array(elements) = key else {
        return false;
    };
    elements.len() > prefix.len()
        && prefix
            .iter()
            .zip(elements.iter())
            .all(|(p, e)| collate(p, e) == Ordering::Equal)
}

/// The smallest key that can match a string-prefix request, or None
/// when the request shape is invalid.
fn string_prefix_lower_key(prefix: &Value) -> Option<Value> {
    match prefix {
        Value::String(_) => Some(prefix.clone()),
        Value::Array(parts) => match parts.last() {
            Some(Value::String(_)) => Some(prefix.clone()),
            _ => None,
        },
        _ => None,
    }
}

/// True when `key` matches a string-prefix request: a string starting
/// with the prefix, or an array whose element at the prefix's last
/// position is a string starting with the prefix's trailing string,
/// with all earlier elements collating equal.
fn matches_string_prefix(key: &Value, prefix: &Value) -> bool {
    match (key, prefix) {
        (Value::String(k), Value::String(p)) => k.starts_with(p.as_str()),
        (Value::Array(elements), Value::Array(parts)) => {
            let Some(Value::String(last)) = parts.last() else {
                return false;
            };
            if elements.len() < parts.len() {
                return false;
            }
            let leading = parts.len() - 1;
            let leading_equal = parts[..leading]
                .iter()
                .zip(elements.iter())
                .all(|(p, e)| collate(p, e) == Ordering::Equal);
            leading_equal
                && matches!(&elements[leading], Value::String(s) if s.starts_with(last.as_str()))
        }
        _ => false,
    }
}
