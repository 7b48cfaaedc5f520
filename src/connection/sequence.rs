//! Change-feed cursors
//!
//! The server hands out update sequences as either bare integers or
//! strings with a numeric prefix ("142-g1AAAA..."). Clients treat them
//! as opaque but must still answer "is A at least as fresh as B", so
//! the comparison below orders by the numeric part first and falls
//! back to the full text on ties.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collation::compare_numbers;

/// Opaque, monotonically comparable position in the change feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateSequence(Value);

impl UpdateSequence {
    /// The beginning-of-time cursor: every real sequence is newer.
    pub fn zero() -> Self {
        UpdateSequence(Value::from(0u64))
    }

    pub fn is_zero(&self) -> bool {
        *self == UpdateSequence::zero()
    }

    /// True when this cursor is at least as fresh as `other`.
    pub fn is_current_for(&self, other: &UpdateSequence) -> bool {
        self >= other
    }

    /// The raw wire value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Numeric prefix used for ordering, if the sequence has one.
    fn numeric_part(&self) -> Option<f64> {
        match &self.0 {
            Value::Null => Some(0.0),
            Value::Number(n) => n.as_f64(),
            Value::String(s) => {
                let digits: &str = s
                    .find(|c: char| !c.is_ascii_digit())
                    .map_or(s.as_str(), |end| &s[..end]);
                if digits.is_empty() {
                    None
                } else {
                    digits.parse().ok()
                }
            }
            _ => None,
        }
    }

    fn text(&self) -> String {
        match &self.0 {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl From<u64> for UpdateSequence {
    fn from(n: u64) -> Self {
        UpdateSequence(Value::from(n))
    }
}

impl From<&str> for UpdateSequence {
    fn from(s: &str) -> Self {
        UpdateSequence(Value::from(s))
    }
}

impl From<Value> for UpdateSequence {
    fn from(value: Value) -> Self {
        UpdateSequence(value)
    }
}

impl fmt::Display for UpdateSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text())
    }
}

impl PartialEq for UpdateSequence {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for UpdateSequence {}

impl PartialOrd for UpdateSequence {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for UpdateSequence {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.0, &other.0) {
            (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
            _ => match (self.numeric_part(), other.numeric_part()) {
                (Some(a), Some(b)) => {
                    a.total_cmp(&b).then_with(|| self.text().cmp(&other.text()))
                }
                _ => self.text().cmp(&other.text()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_is_oldest() {
        let zero = UpdateSequence::zero();
        assert!(zero.is_zero());
        assert!(zero < UpdateSequence::from(1));
        assert!(zero < UpdateSequence::from("1-abc"));
    }

    #[test]
    fn test_numeric_sequences_compare_by_value() {
        assert!(UpdateSequence::from(9) < UpdateSequence::from(10));
        assert!(UpdateSequence::from(10).is_current_for(&UpdateSequence::from(10)));
    }

    #[test]
    fn test_string_sequences_compare_by_numeric_prefix() {
        let a = UpdateSequence::from("9-zzzz");
        let b = UpdateSequence::from("10-aaaa");
        assert!(a < b);
        assert!(b.is_current_for(&a));
    }

    #[test]
    fn test_mixed_number_and_string_forms() {
        let plain = UpdateSequence::from(42);
        let opaque = UpdateSequence::from("42-g1AAAA");
        // Same numeric part, tie broken by text: "42" < "42-g1AAAA".
        assert!(plain < opaque);
        assert!(opaque.is_current_for(&plain));
    }

    #[test]
    fn test_round_trips_through_json() {
        let seq = UpdateSequence::from("17-feed");
        let encoded = serde_json::to_string(&seq).expect("serialize");
        assert_eq!(encoded, "\"17-feed\"");
        let decoded: UpdateSequence = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(seq, decoded);
    }
}
