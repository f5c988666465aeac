//! Design-time commands over rule documents: check, refs, upgrade.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};

use crate::error::{LoadError, RuleDiagnostic};
use crate::io::rules_store::{load_rules, write_rules};

/// Result of checking one rule document.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckReport {
    pub rules: usize,
    pub upgraded: bool,
    pub warnings: Vec<String>,
    /// Expression errors, every one of them.
    pub diagnostics: Vec<RuleDiagnostic>,
}

impl CheckReport {
    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Load, validate, and compile every expression in `path`.
///
/// Structural problems (bad JSON, schema, invariants) are errors; expression
/// errors are collected into the report.
pub fn check_rules(path: &Path) -> Result<CheckReport> {
    let loaded = load_rules(path)?;
    let diagnostics = match loaded.rules.compile() {
        Ok(_) => Vec::new(),
        Err(LoadError::Compile(diagnostics)) => diagnostics,
        Err(other) => return Err(other).with_context(|| format!("compile {}", path.display())),
    };
    Ok(CheckReport {
        rules: loaded.rules.rules.len(),
        upgraded: loaded.upgraded,
        warnings: loaded.warnings,
        diagnostics,
    })
}

/// State variables the document touches.
pub fn state_references(path: &Path) -> Result<BTreeSet<String>> {
    Ok(load_rules(path)?.rules.state_references())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeOutcome {
    pub rules: usize,
    /// The input was in the legacy format.
    pub upgraded: bool,
}

/// Write the canonical form of `input` to `output` (which may be `input`).
pub fn upgrade_rules(input: &Path, output: &Path) -> Result<UpgradeOutcome> {
    let loaded = load_rules(input)?;
    write_rules(output, &loaded.rules)?;
    Ok(UpgradeOutcome {
        rules: loaded.rules.rules.len(),
        upgraded: loaded.upgraded,
    })
}
