//! Property-based tests for the runtime's quantified invariants.

pub mod backoff;
pub mod bucket;
pub mod classifier;
