//! Deterministic logic shared by the store and the rule engine.
//!
//! Core modules are free of I/O side effects. They operate on in-memory
//! documents and rule sets and return deterministic outputs suitable for
//! tests.

pub mod expr;
pub mod invariants;
pub mod legacy;
pub mod patch;
pub mod rules;
pub mod types;
