//! Row representation handed back to callers.
//!
//! # Invariants
//! - Records only contain JSON-safe values.
//! - Temporal values use the fixed `YYYY-MM-DD HH:MM:SS` shape.

pub mod record;
