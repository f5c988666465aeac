//! Event-driven rule engine over a reactive state store.
//!
//! An assistive-communication board raises discrete events (a button press,
//! a focus change, a timer tick). The [`engine`] matches each event against
//! a prioritized rule set, evaluates conditions and value expressions
//! against a shared state document, and applies the fired rule's updates to
//! the [`store`], which notifies interested widgets and persists the
//! document. The architecture separates:
//!
//! - **[`core`]**: Pure, deterministic logic (expressions, patches, rule
//!   documents, legacy upgrade). No I/O.
//! - **[`io`]**: Side-effecting operations (config, state storage, rule
//!   files).
//!
//! [`store`] and [`engine`] hold the single-threaded runtime; [`session`]
//! and [`check`] coordinate them with I/O for the CLI.

pub mod check;
pub mod core;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
