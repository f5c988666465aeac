//! Scenario file parsing and validation.
//!
//! Scenarios are TOML files defining rules, an initial state, a sequence of
//! dispatched events, and checks on what happened. See `scenarios/cases/`
//! for examples.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use serde_json::{Map, Value};

use actions::core::rules::{Rule, RuleChild, RuleSet};

/// A parsed scenario file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CaseFile {
    pub case: CaseMeta,
    #[serde(default)]
    pub config: CaseConfig,
    /// Persisted state the store is hydrated from.
    #[serde(default)]
    pub state: Map<String, Value>,
    #[serde(default)]
    pub rules: Vec<CaseRule>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub checks: Vec<Check>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseMeta {
    /// Unique identifier (slug format: `[a-z0-9_-]+`).
    pub id: String,
    pub description: String,
}

/// Engine configuration overrides for the scenario.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct CaseConfig {
    pub max_cycles: Option<usize>,
    pub max_nesting: Option<usize>,
    pub max_update_depth: Option<usize>,
}

/// A rule in scenario shorthand. Conditions come before updates.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseRule {
    pub origin: String,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub updates: Vec<CaseUpdate>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseUpdate {
    pub state: String,
    pub value: String,
}

/// One dispatched event.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Step {
    pub origin: String,
    pub event: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// Verification run after every step has been dispatched. `step` indexes
/// into `steps`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Check {
    /// A (dotted) state value equals `value` after the last step.
    StateEquals { name: String, value: Value },
    /// The rules fired by a step, in cycle order.
    FiredRules { step: usize, rules: Vec<usize> },
    /// The origins evaluated by a step, in cycle order.
    CycleOrder { step: usize, origins: Vec<String> },
    /// A step changed no state.
    NoChanges { step: usize },
    /// A step failed with an error mentioning `message`.
    DispatchFails { step: usize, message: String },
}

impl CaseFile {
    /// Load and validate a scenario file from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read case {}", path.display()))?;
        Self::parse_str(&contents).with_context(|| format!("load case {}", path.display()))
    }

    pub fn parse_str(contents: &str) -> Result<Self> {
        let case: CaseFile = toml::from_str(contents).context("parse case")?;
        case.validate()?;
        Ok(case)
    }

    /// The scenario's rules in engine form.
    pub fn rule_set(&self) -> RuleSet {
        let rules = self
            .rules
            .iter()
            .map(|rule| {
                let conditions = rule.conditions.iter().map(|expression| RuleChild::Condition {
                    expression: expression.clone(),
                });
                let updates = rule.updates.iter().map(|update| RuleChild::Update {
                    state_name: update.state.clone(),
                    new_value: update.value.clone(),
                });
                Rule {
                    origin: rule.origin.clone(),
                    children: conditions.chain(updates).collect(),
                }
            })
            .collect();
        RuleSet { rules }
    }

    fn validate(&self) -> Result<()> {
        validate_case_id(&self.case.id)?;
        for (name, value) in [
            ("max_cycles", self.config.max_cycles),
            ("max_nesting", self.config.max_nesting),
            ("max_update_depth", self.config.max_update_depth),
        ] {
            if value == Some(0) {
                bail!("config.{name} must be > 0");
            }
        }
        if self.steps.is_empty() {
            bail!("steps must be a non-empty array");
        }
        if self.checks.is_empty() {
            bail!("checks must be a non-empty array");
        }
        for (index, check) in self.checks.iter().enumerate() {
            check
                .validate(self.steps.len())
                .with_context(|| format!("checks[{index}] invalid"))?;
        }
        Ok(())
    }
}

impl Check {
    fn validate(&self, steps: usize) -> Result<()> {
        let step = match self {
            Check::StateEquals { name, .. } => {
                if name.trim().is_empty() {
                    bail!("state_equals.name must be non-empty");
                }
                return Ok(());
            }
            Check::FiredRules { step, .. }
            | Check::CycleOrder { step, .. }
            | Check::NoChanges { step }
            | Check::DispatchFails { step, .. } => *step,
        };
        if step >= steps {
            bail!("step {step} out of range ({steps} steps)");
        }
        Ok(())
    }
}

/// Discover and load all scenario files from a directory.
///
/// Returns cases sorted by id. Errors if duplicate ids are found.
pub fn discover_cases(dir: &Path) -> Result<Vec<CaseFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut cases = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read cases dir {}", dir.display()))? {
        let entry = entry.context("read case entry")?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }
        cases.push(CaseFile::load(&path)?);
    }
    cases.sort_by(|left, right| left.case.id.cmp(&right.case.id));
    for pair in cases.windows(2) {
        if pair[0].case.id == pair[1].case.id {
            return Err(anyhow!("duplicate case.id {}", pair[0].case.id));
        }
    }
    Ok(cases)
}

fn validate_case_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        bail!("case.id must be non-empty");
    }
    if !id
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
    {
        bail!("case.id must use [a-z0-9_-] only");
    }
    Ok(())
}
