//! Checkpoint codec
//!
//! Serializes a row store into a self-validating JSON blob and back.
//! The format is column-oriented with a deduplicated object table:
//!
//! ```json
//! {
//!   "checksum": "crc32:deadbeef",
//!   "payload": {
//!     "format_version": 1,
//!     "columns": 3,
//!     "compdata": [0, 1, 2, 0, 3, 2],
//!     "objects": ["doc-1", "key-a", null, "key-b"],
//!     "update_sequence": "42-feed",
//!     "schema_tag": "v1",
//!     "created_at": "2026-02-04T11:30:00+00:00"
//!   }
//! }
//! ```
//!
//! `compdata` holds fixed-width tuples of indexes into `objects`, one
//! tuple per row: (doc id, key, value). Repeated values are stored
//! once. Document body snapshots are never written.
//!
//! Decoding degrades instead of failing: anything unparseable, from a
//! foreign format version, or failing its checksum reads as "no
//! checkpoint". The caller decides what a stale schema tag means.

use std::collections::HashMap;
use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::connection::UpdateSequence;

use super::errors::{ViewError, ViewResult};
use super::row::ViewRow;
use super::store::RowStore;

/// Version written by this codec. Readers reject everything else.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// Index tuple width: doc id, key, value.
const COLUMNS: u32 = 3;

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointPayload {
    format_version: u32,
    columns: u32,
    compdata: Vec<u32>,
    objects: Vec<Value>,
    update_sequence: UpdateSequence,
    schema_tag: String,
    created_at: String,
}

/// A decoded checkpoint, ready to be loaded into a store.
#[derive(Debug, PartialEq)]
pub struct CheckpointState {
    pub rows: Vec<ViewRow>,
    pub update_sequence: UpdateSequence,
    pub schema_tag: String,
    pub created_at: String,
}

/// Why a checkpoint blob was rejected. Rejection is a degradation
/// (the view resyncs from scratch), not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointReject {
    /// Not JSON, or not the envelope shape.
    Unparseable,
    /// Written by a different format version.
    ForeignVersion,
    /// Payload bytes do not match the declared checksum.
    ChecksumMismatch,
    /// Index table is inconsistent with the object table.
    MalformedTable,
}

impl CheckpointReject {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointReject::Unparseable => "unparseable",
            CheckpointReject::ForeignVersion => "foreign_version",
            CheckpointReject::ChecksumMismatch => "checksum_mismatch",
            CheckpointReject::MalformedTable => "malformed_table",
        }
    }
}

impl fmt::Display for CheckpointReject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Serialize the store's rows and sequence under `schema_tag`.
pub fn encode(store: &RowStore, schema_tag: &str) -> ViewResult<Vec<u8>> {
    let mut objects: Vec<Value> = Vec::new();
    let mut dedup: HashMap<String, u32> = HashMap::new();
    let mut compdata: Vec<u32> = Vec::with_capacity(store.len() * COLUMNS as usize);

    for row in store.iter() {
        compdata.push(intern(&mut objects, &mut dedup, &Value::String(row.doc_id.clone())));
        compdata.push(intern(&mut objects, &mut dedup, &row.key));
        compdata.push(intern(&mut objects, &mut dedup, &row.value));
    }

    let payload = CheckpointPayload {
        format_version: CHECKPOINT_FORMAT_VERSION,
        columns: COLUMNS,
        compdata,
        objects,
        update_sequence: store.update_sequence().clone(),
        schema_tag: schema_tag.to_string(),
        created_at: Utc::now().to_rfc3339(),
    };

    let payload_value = serde_json::to_value(&payload)
        .map_err(|e| ViewError::CheckpointEncode(e.to_string()))?;
    let payload_bytes = serde_json::to_vec(&payload_value)
        .map_err(|e| ViewError::CheckpointEncode(e.to_string()))?;
    let envelope = json!({
        "checksum": format_checksum(&payload_bytes),
        "payload": payload_value,
    });
    serde_json::to_vec(&envelope).map_err(|e| ViewError::CheckpointEncode(e.to_string()))
}

/// Parse and validate a checkpoint blob.
pub fn decode(bytes: &[u8]) -> Result<CheckpointState, CheckpointReject> {
    let envelope: Value =
        serde_json::from_slice(bytes).map_err(|_| CheckpointReject::Unparseable)?;
    let payload_value = envelope.get("payload").ok_or(CheckpointReject::Unparseable)?;

    // Version gate first: a foreign layout must not read as corruption.
    let version = payload_value
        .get("format_version")
        .and_then(Value::as_u64)
        .ok_or(CheckpointReject::Unparseable)?;
    if version != CHECKPOINT_FORMAT_VERSION as u64 {
        return Err(CheckpointReject::ForeignVersion);
    }

    let declared = envelope
        .get("checksum")
        .and_then(Value::as_str)
        .ok_or(CheckpointReject::Unparseable)?;
    let payload_bytes =
        serde_json::to_vec(payload_value).map_err(|_| CheckpointReject::Unparseable)?;
    if format_checksum(&payload_bytes) != declared {
        return Err(CheckpointReject::ChecksumMismatch);
    }

    let payload: CheckpointPayload = serde_json::from_value(payload_value.clone())
        .map_err(|_| CheckpointReject::Unparseable)?;

    if payload.columns != COLUMNS {
        return Err(CheckpointReject::MalformedTable);
    }
    if payload.compdata.len() % COLUMNS as usize != 0 {
        return Err(CheckpointReject::MalformedTable);
    }

    let mut rows = Vec::with_capacity(payload.compdata.len() / COLUMNS as usize);
    for tuple in payload.compdata.chunks_exact(COLUMNS as usize) {
        let doc_id = match lookup(&payload.objects, tuple[0])? {
            Value::String(id) => id.clone(),
            _ => return Err(CheckpointReject::MalformedTable),
        };
        let key = lookup(&payload.objects, tuple[1])?.clone();
        let value = lookup(&payload.objects, tuple[2])?.clone();
        rows.push(ViewRow::new(doc_id, key, value));
    }

    Ok(CheckpointState {
        rows,
        update_sequence: payload.update_sequence,
        schema_tag: payload.schema_tag,
        created_at: payload.created_at,
    })
}

/// Intern `value` in the object table, returning its index. Equality
/// is canonical-text equality, so 3 and 3.0 stay distinct entries.
fn intern(objects: &mut Vec<Value>, dedup: &mut HashMap<String, u32>, value: &Value) -> u32 {
    let text = value.to_string();
    if let Some(&index) = dedup.get(&text) {
        return index;
    }
    let index = objects.len() as u32;
    objects.push(value.clone());
    dedup.insert(text, index);
    index
}

fn lookup(objects: &[Value], index: u32) -> Result<&Value, CheckpointReject> {
    objects
        .get(index as usize)
        .ok_or(CheckpointReject::MalformedTable)
}

fn format_checksum(bytes: &[u8]) -> String {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    format!("crc32:{:08x}", hasher.finalize())
}
