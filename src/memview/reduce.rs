//! Grouped reduction
//!
//! Reduce queries collapse runs of rows into aggregate rows. The
//! grouping key is the row key truncated per [`GroupLevel`]; rows are
//! already in collation order, so grouping is a single pass over
//! adjacent rows.

use serde_json::Value;

use crate::collation::Collation;

use super::adapter::ReduceFn;
use super::row::ViewRow;

/// How much of each row key participates in grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupLevel {
    /// One aggregate over every row; the result key is null.
    Single,
    /// Group by the first N elements of array keys. Non-array keys
    /// group by their whole key.
    Prefix(usize),
    /// Group by the exact key.
    Exact,
}

impl GroupLevel {
    /// The grouping key for a row key under this level.
    pub fn truncate(&self, key: &Value) -> Value {
        match self {
            GroupLevel::Single => Value::Null,
            GroupLevel::Exact => key.clone(),
            GroupLevel::Prefix(n) => match key {
                Value::Array(elements) => {
                    Value::Array(elements.iter().take(*n).cloned().collect())
                }
                other => other.clone(),
            },
        }
    }
}

/// One reduced group: the grouping key, the member rows' full keys,
/// and their values.
#[derive(Debug)]
pub struct RowGroup<'a> {
    pub key: Value,
    pub keys: Vec<&'a Value>,
    pub values: Vec<&'a Value>,
}

/// Split ordered rows into adjacent groups under `level`.
///
/// Rows must already be sorted; equal grouping keys are only merged
/// when adjacent, which the collation order guarantees for index
/// scans.
pub fn group_rows<'a>(
    rows: &[&'a ViewRow],
    level: GroupLevel,
    collation: Collation,
) -> Vec<RowGroup<'a>> {
    let mut groups: Vec<RowGroup<'a>> = Vec::new();
    for row in rows {
        let group_key = level.truncate(&row.key);
        match groups.last_mut() {
            Some(current)
                if collation.compare(&current.key, &group_key) == std::cmp::Ordering::Equal =>
            {
                current.keys.push(&row.key);
                current.values.push(&row.value);
            }
            _ => groups.push(RowGroup {
                key: group_key,
                keys: vec![&row.key],
                values: vec![&row.value],
            }),
        }
    }
    groups
}

/// Apply `reduce` to one group, cloning the borrowed slices into the
/// owned form the reduce signature wants.
pub fn reduce_group(reduce: &ReduceFn, group: &RowGroup<'_>) -> Value {
    let keys: Vec<Value> = group.keys.iter().map(|k| (*k).clone()).collect();
    let values: Vec<Value> = group.values.iter().map(|v| (*v).clone()).collect();
    reduce(&keys, &values, false)
}

// ============================================================================
// Built-in reducers
// ============================================================================

/// Counts rows. On rereduce, sums the partial counts.
pub fn count() -> ReduceFn {
    Box::new(|_keys, values, rereduce| {
        if rereduce {
            sum_values(values)
        } else {
            Value::from(values.len() as u64)
        }
    })
}

/// Sums numeric values, ignoring non-numbers. Rereduce is the same
/// operation.
pub fn sum() -> ReduceFn {
    Box::new(|_keys, values, _rereduce| sum_values(values))
}

fn sum_values(values: &[Value]) -> Value {
    let total: f64 = values.iter().filter_map(Value::as_f64).sum();
    if total.fract() == 0.0 && total.abs() < (1i64 << 53) as f64 {
        Value::from(total as i64)
    } else {
        Value::from(total)
    }
}
