//! # Observability
//!
//! Structured logging for the view engine.
//!
//! ## Principles
//!
//! 1. Observability is read-only
//! 2. No side effects on view state
//! 3. No async or background threads
//! 4. Deterministic output
//!
//! Hosts that embed the library control verbosity through
//! [`Logger::set_min_severity`]; everything below the threshold is
//! dropped before formatting.

mod logger;

pub use logger::{Logger, Severity};
