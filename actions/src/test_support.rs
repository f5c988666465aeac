//! Test-only helpers for building rules, engines, and recording listeners.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::Value;

use crate::core::expr::FunctionLibrary;
use crate::core::rules::{Rule, RuleChild, RuleSet};
use crate::engine::{EngineOptions, RuleEngine};
use crate::store::{Listener, StateStore, Widget};

/// A rule with its conditions first, then its updates, in the given order.
pub fn rule(origin: &str, conditions: &[&str], updates: &[(&str, &str)]) -> Rule {
    let mut children = Vec::with_capacity(conditions.len() + updates.len());
    for expression in conditions {
        children.push(RuleChild::Condition {
            expression: expression.to_string(),
        });
    }
    for (state_name, new_value) in updates {
        children.push(RuleChild::Update {
            state_name: state_name.to_string(),
            new_value: new_value.to_string(),
        });
    }
    Rule {
        origin: origin.to_string(),
        children,
    }
}

pub fn rule_set(rules: Vec<Rule>) -> RuleSet {
    RuleSet { rules }
}

/// An engine over a fresh in-memory store with the standard library and
/// default limits.
pub fn engine_with(rules: Vec<Rule>) -> RuleEngine {
    RuleEngine::new(
        Rc::new(StateStore::in_memory()),
        &rule_set(rules),
        FunctionLibrary::standard(),
        EngineOptions::default(),
    )
    .expect("rules compile")
}

/// A callback listener that records every notification's values.
pub fn record_calls() -> (Listener, Rc<RefCell<Vec<Vec<Value>>>>) {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&calls);
    let listener = Listener::callback(move |_, values| sink.borrow_mut().push(values.to_vec()));
    (listener, calls)
}

/// A widget that counts renders and can be disconnected.
#[derive(Debug)]
pub struct RecordingWidget {
    pub connected: Cell<bool>,
    pub renders: Cell<usize>,
}

impl Default for RecordingWidget {
    fn default() -> Self {
        Self {
            connected: Cell::new(true),
            renders: Cell::new(0),
        }
    }
}

impl Widget for RecordingWidget {
    fn is_connected(&self) -> bool {
        self.connected.get()
    }

    fn render(&self, _store: &StateStore) {
        self.renders.set(self.renders.get() + 1);
    }
}
