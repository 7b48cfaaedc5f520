//! # Collation
//!
//! Ordering rules for view keys. Every ordered structure in the view
//! engine (the row index, range bounds, group comparisons) goes
//! through this module so that one definition of "less than" governs
//! them all.
//!
//! ## Design Principles
//!
//! - Deterministic: equal inputs always collate identically, across
//!   runs and platforms.
//! - Total: every pair of JSON values is ordered, including mixed
//!   numeric representations.
//! - Self-contained: a [`CompositeKey`] carries its collation, so the
//!   standard ordered containers need no external comparator.

mod composite;
mod order;

pub use composite::{CompositeKey, DocIdBound};
pub use order::{collate, Collation};

pub(crate) use order::compare_numbers;
