//! Shared dispatch types.
//!
//! These describe what a dispatch did. They carry no references into the
//! store or the engine, so callers may keep them after the dispatch returns.

use serde::Serialize;

use crate::core::patch::{ChangeSet, Document};

/// Event name used by [`crate::engine::RuleEngine::init`].
pub const INIT_EVENT: &str = "init";

/// Prefix for keyboard-modified variants of an event (`alt-press`).
pub const ALT_PREFIX: &str = "alt-";

/// A synthesized follow-up event waiting in a dispatch's pending queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEvent {
    pub origin: String,
    pub event: String,
}

/// The most recent top-level dispatch, kept for design-time highlighting.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchRecord {
    pub origin: String,
    pub event: String,
    pub data: Document,
    /// Index of the last rule fired by any cycle of the dispatch.
    pub fired_rule: Option<usize>,
}

/// One pass of the cycle loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub origin: String,
    pub event: String,
    /// Index of the rule that fired, if any.
    pub fired: Option<usize>,
    /// Top-level keys the fired rule's patch changed.
    pub changes: ChangeSet,
}

/// Everything one `dispatch` call did, in cycle order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub cycles: Vec<CycleReport>,
}

impl DispatchOutcome {
    /// Rules fired, in cycle order.
    pub fn fired_rules(&self) -> Vec<usize> {
        self.cycles.iter().filter_map(|cycle| cycle.fired).collect()
    }

    /// Origins evaluated, in cycle order.
    pub fn origins(&self) -> Vec<&str> {
        self.cycles.iter().map(|cycle| cycle.origin.as_str()).collect()
    }

    /// Union of every cycle's change set.
    pub fn changed_keys(&self) -> ChangeSet {
        self.cycles
            .iter()
            .flat_map(|cycle| cycle.changes.iter().map(str::to_string))
            .collect()
    }
}

/// The event name for a press, `alt-` prefixed when the modifier is held.
pub fn modified_event(base: &str, alt: bool) -> String {
    if alt {
        format!("{ALT_PREFIX}{base}")
    } else {
        base.to_string()
    }
}
