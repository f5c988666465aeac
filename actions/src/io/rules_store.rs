//! Rule document load/save with legacy upgrade, schema, and invariant
//! validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::invariants::{lint_rules, validate_rules};
use crate::core::legacy::{is_legacy, upgrade};
use crate::core::rules::{DesignNode, RuleSet};

/// JSON Schema for the canonical rule document.
pub const RULES_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/actions/v1.schema.json"
));

/// A rule set read from disk.
#[derive(Debug, Clone)]
pub struct LoadedRules {
    pub rules: RuleSet,
    /// The file was in the legacy flat format and was upgraded in memory.
    pub upgraded: bool,
    /// Lint findings; loading still succeeded.
    pub warnings: Vec<String>,
}

/// Load and validate a rule document from disk.
pub fn load_rules(path: &Path) -> Result<LoadedRules> {
    debug!(path = %path.display(), "loading rules");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read rules {}", path.display()))?;
    let document: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse rules {}", path.display()))?;
    parse_rules(document).with_context(|| format!("load rules {}", path.display()))
}

/// Upgrade (if legacy), schema-validate, and check invariants.
///
/// Expressions are not compiled here; building a
/// [`crate::engine::RuleEngine`] compiles them.
pub fn parse_rules(document: Value) -> Result<LoadedRules> {
    let upgraded = is_legacy(&document);
    let canonical = if upgraded {
        let design = upgrade(document)?;
        info!(rules = design.children.len(), "upgraded legacy rule document");
        serde_json::to_value(design).context("serialize upgraded rules")?
    } else {
        document
    };
    validate_schema(&canonical)?;
    let design: DesignNode =
        serde_json::from_value(canonical).context("deserialize rule document")?;
    let rules = RuleSet::from_design(&design)?;

    let errors = validate_rules(&rules);
    if !errors.is_empty() {
        return Err(anyhow!("rule invariants failed: {}", errors.join("; ")));
    }
    let warnings = lint_rules(&rules);
    for warning in &warnings {
        warn!(warning = %warning, "suspicious rule");
    }
    debug!(rules = rules.rules.len(), upgraded, "rules loaded");
    Ok(LoadedRules {
        rules,
        upgraded,
        warnings,
    })
}

/// Write the canonical form of `rules` (temp file + rename).
pub fn write_rules(path: &Path, rules: &RuleSet) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(&rules.to_design())?;
    buf.push('\n');
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp rules {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace rules {}", path.display()))?;
    Ok(())
}

fn validate_schema(document: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(RULES_SCHEMA).context("parse rules schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(document) {
        let messages = compiled
            .iter_errors(document)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "rule schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}
