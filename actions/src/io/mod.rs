//! Side-effecting adapters: configuration, state persistence, and rule
//! documents on disk.

pub mod config;
pub mod rules_store;
pub mod storage;
