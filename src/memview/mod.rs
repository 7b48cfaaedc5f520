//! # Materialized View Subsystem
//!
//! Map/reduce views kept entirely in memory and fed by a change
//! feed. Each view runs a mapper over documents, stores the emitted
//! rows in composite-key order, and answers key, prefix, range and
//! grouped-reduce queries against that index.
//!
//! ## Architecture
//!
//! - **Row Store**: ordered rows plus a per-document reverse index
//! - **Adapter**: pluggable mapper with two-phase emission
//! - **Query**: selection, grouping and reduction pipeline
//! - **Checkpoint**: compact persisted snapshots of the index
//! - **View**: lifecycle controller (load, update, checkpoint)
//! - **Chained**: materialized grouped aggregates over a view
//!
//! ## Consistency
//!
//! A view is always consistent with exactly one feed position: bulk
//! load replaces everything at the server's sequence, and incremental
//! updates re-index one document at a time, advancing the sequence
//! only once a whole batch is in.

pub mod adapter;
pub mod chained;
pub mod checkpoint;
pub mod errors;
pub mod observer;
pub mod query;
pub mod reduce;
pub mod row;
pub mod store;
pub mod view;

pub use adapter::{DefaultMapper, Emitter, Mapper, SourceDocument, ViewDefinition};
pub use chained::ChainedReduceView;
pub use checkpoint::{CheckpointReject, CheckpointState, CHECKPOINT_FORMAT_VERSION};
pub use errors::{ViewError, ViewResult};
pub use observer::{ViewChangeEvent, ViewObserverRegistry};
pub use query::{QueryResult, QueryRow, ViewQuery};
pub use reduce::GroupLevel;
pub use row::ViewRow;
pub use store::RowStore;
pub use view::{MemView, RestoreOutcome, UpdateOutcome, ViewState};
