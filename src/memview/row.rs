//! Index rows

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One indexed row: a single emission from mapping one document.
///
/// A document that emits N pairs produces N rows sharing its id. The
/// optional body snapshot is an in-memory convenience only; checkpoints
/// persist derived rows, never document bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRow {
    /// Id of the emitting document.
    pub doc_id: String,
    /// Emitted key; drives ordering.
    pub key: Value,
    /// Emitted value. `Null` when the mapper emitted no value.
    pub value: Value,
    /// Body of the emitting document, when the caller asked to keep it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
}

impl ViewRow {
    pub fn new(doc_id: impl Into<String>, key: Value, value: Value) -> Self {
        ViewRow {
            doc_id: doc_id.into(),
            key,
            value,
            doc: None,
        }
    }

    pub fn with_doc(mut self, doc: Value) -> Self {
        self.doc = Some(doc);
        self
    }
}
