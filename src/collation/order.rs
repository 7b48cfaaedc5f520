//! Canonical collation over JSON view keys
//!
//! View keys are ordered by type rank first, then within a type:
//! null < boolean < number < string < array < object.
//!
//! - Numbers compare by numeric value across integer and float
//!   representations.
//! - Strings compare by Unicode code point. This is an accepted
//!   approximation of the server's locale-aware ordering; byte order of
//!   UTF-8 equals code-point order, so `str::cmp` is exact here.
//! - Arrays compare element-wise, shorter-is-less on a common prefix.
//! - Objects compare member-wise in member-name order, each member by
//!   name before value.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Collation mode carried by a view definition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collation {
    /// Type-ranked canonical ordering (the default).
    #[default]
    Canonical,
    /// Code-point ordering over the canonical JSON text of the key,
    /// with no type ranking.
    Raw,
}

impl Collation {
    /// Compare two view keys under this collation.
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        match self {
            Collation::Canonical => collate(a, b),
            Collation::Raw => a.to_string().cmp(&b.to_string()),
        }
    }
}

/// Rank of a value's type in the canonical order.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Compare two JSON numbers by numeric value.
///
/// Integer pairs compare exactly; mixed representations fall back to
/// f64, losing precision above 2^53 (part of the accepted collation
/// approximation). `total_cmp` keeps the order total.
pub(crate) fn compare_numbers(a: &Number, b: &Number) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x.cmp(&y);
    }
    let x = a.as_f64().unwrap_or(f64::NAN);
    let y = b.as_f64().unwrap_or(f64::NAN);
    x.total_cmp(&y)
}

/// Canonical comparison of two view keys.
///
/// Strict weak ordering: the row store relies on it for binary search,
/// range bounds, and duplicate detection.
pub fn collate(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }

    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (ex, ey) in x.iter().zip(y.iter()) {
                let ord = collate(ex, ey);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            // Member maps iterate in sorted name order.
            for ((xn, xv), (yn, yv)) in x.iter().zip(y.iter()) {
                let name = xn.cmp(yn);
                if name != Ordering::Equal {
                    return name;
                }
                let member = collate(xv, yv);
                if member != Ordering::Equal {
                    return member;
                }
            }
            x.len().cmp(&y.len())
        }
        // Equal ranks guarantee equal variants above.
        _ => Ordering::Equal,
    }
}
