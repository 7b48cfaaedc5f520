//! vane - locally materialized map/reduce views over a change feed
//!
//! Views index documents from a remote database into ordered,
//! queryable in-memory row stores, kept current incrementally and
//! persisted as compact checkpoints.

pub mod collation;
pub mod connection;
pub mod memview;
pub mod observability;
