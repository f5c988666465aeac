//! Check evaluation against a finished scenario run.

use actions::core::patch::lookup_path;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::case::Check;
use crate::run::{CaseRun, StepResult};

/// Collected check outcomes for a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Judgment {
    pub checks: Vec<CheckOutcome>,
}

impl Judgment {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(CheckOutcome::passed)
    }
}

/// Result of a single check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckOutcome {
    StateEquals {
        name: String,
        expected: Value,
        actual: Value,
        passed: bool,
    },
    FiredRules {
        step: usize,
        expected: Vec<usize>,
        actual: Option<Vec<usize>>,
        passed: bool,
    },
    CycleOrder {
        step: usize,
        expected: Vec<String>,
        actual: Option<Vec<String>>,
        passed: bool,
    },
    NoChanges {
        step: usize,
        actual: Option<Vec<String>>,
        passed: bool,
    },
    DispatchFails {
        step: usize,
        message: String,
        actual: Option<String>,
        passed: bool,
    },
}

impl CheckOutcome {
    pub fn passed(&self) -> bool {
        match self {
            CheckOutcome::StateEquals { passed, .. }
            | CheckOutcome::FiredRules { passed, .. }
            | CheckOutcome::CycleOrder { passed, .. }
            | CheckOutcome::NoChanges { passed, .. }
            | CheckOutcome::DispatchFails { passed, .. } => *passed,
        }
    }

    /// Short label used when aggregating reports.
    pub fn label(&self) -> String {
        match self {
            CheckOutcome::StateEquals { name, .. } => format!("state_equals({name})"),
            CheckOutcome::FiredRules { step, .. } => format!("fired_rules(step {step})"),
            CheckOutcome::CycleOrder { step, .. } => format!("cycle_order(step {step})"),
            CheckOutcome::NoChanges { step, .. } => format!("no_changes(step {step})"),
            CheckOutcome::DispatchFails { step, .. } => format!("dispatch_fails(step {step})"),
        }
    }
}

/// Evaluate every check against the run.
#[instrument(skip_all, fields(check_count = checks.len()))]
pub fn run_checks(checks: &[Check], run: &CaseRun) -> Judgment {
    let outcomes = checks
        .iter()
        .map(|check| {
            let outcome = judge(check, run);
            debug!(label = %outcome.label(), passed = outcome.passed(), "check evaluated");
            outcome
        })
        .collect();
    Judgment { checks: outcomes }
}

fn judge(check: &Check, run: &CaseRun) -> CheckOutcome {
    match check {
        Check::StateEquals { name, value } => {
            let actual = lookup_path(&run.state, name).cloned().unwrap_or(Value::Null);
            CheckOutcome::StateEquals {
                name: name.clone(),
                expected: value.clone(),
                passed: values_match(value, &actual),
                actual,
            }
        }
        Check::FiredRules { step, rules } => {
            let actual = completed(run, *step).map(|(fired, _, _)| fired.clone());
            CheckOutcome::FiredRules {
                step: *step,
                expected: rules.clone(),
                passed: actual.as_ref() == Some(rules),
                actual,
            }
        }
        Check::CycleOrder { step, origins } => {
            let actual = completed(run, *step).map(|(_, order, _)| order.clone());
            CheckOutcome::CycleOrder {
                step: *step,
                expected: origins.clone(),
                passed: actual.as_ref() == Some(origins),
                actual,
            }
        }
        Check::NoChanges { step } => {
            let actual = completed(run, *step).map(|(_, _, changes)| changes.clone());
            CheckOutcome::NoChanges {
                step: *step,
                passed: actual.as_ref().is_some_and(Vec::is_empty),
                actual,
            }
        }
        Check::DispatchFails { step, message } => {
            let actual = match run.steps.get(*step).map(|record| &record.result) {
                Some(StepResult::Failed { message: failure }) => Some(failure.clone()),
                _ => None,
            };
            CheckOutcome::DispatchFails {
                step: *step,
                message: message.clone(),
                passed: actual
                    .as_deref()
                    .is_some_and(|actual| actual.contains(message.as_str())),
                actual,
            }
        }
    }
}

type Completed<'a> = (&'a Vec<usize>, &'a Vec<String>, &'a Vec<String>);

fn completed(run: &CaseRun, step: usize) -> Option<Completed<'_>> {
    match &run.steps.get(step)?.result {
        StepResult::Completed {
            fired,
            origins,
            changes,
        } => Some((fired, origins, changes)),
        StepResult::Failed { .. } => None,
    }
}

/// TOML has no null and writes integers without a fraction, so numbers
/// compare by value rather than by representation.
fn values_match(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Number(left), Value::Number(right)) => left.as_f64() == right.as_f64(),
        _ => expected == actual,
    }
}
