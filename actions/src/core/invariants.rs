//! Semantic checks on rule sets not expressible via JSON Schema.
//!
//! [`validate_rules`] finds rules that cannot be applied at all and blocks
//! loading. [`lint_rules`] finds rules that load fine but probably do not do
//! what their author meant; callers report them and carry on.

use std::collections::BTreeSet;

use crate::core::rules::RuleSet;

/// Check rule-set invariants:
/// - Every update names a state variable
/// - Update targets are top-level names (no dots)
pub fn validate_rules(rules: &RuleSet) -> Vec<String> {
    let mut errors = Vec::new();
    for (index, rule) in rules.rules.iter().enumerate() {
        for (state_name, _) in rule.updates() {
            if state_name.trim().is_empty() {
                errors.push(format!("rule {index}: update has no state name"));
            } else if state_name.contains('.') {
                errors.push(format!(
                    "rule {index}: update target '{state_name}' must be a top-level name"
                ));
            }
        }
    }
    errors
}

/// Suspicious but legal rule shapes:
/// - An empty origin never matches a named event source
/// - A target without the `$` prefix is invisible to `$name` references
/// - Assigning the same target twice keeps only the later value
pub fn lint_rules(rules: &RuleSet) -> Vec<String> {
    let mut warnings = Vec::new();
    for (index, rule) in rules.rules.iter().enumerate() {
        if rule.origin.is_empty() {
            warnings.push(format!("rule {index}: empty origin never matches"));
        }
        let mut targets = BTreeSet::new();
        for (state_name, _) in rule.updates() {
            if !state_name.is_empty() && !state_name.starts_with('$') {
                warnings.push(format!(
                    "rule {index}: target '{state_name}' has no `$` prefix"
                ));
            }
            if !targets.insert(state_name) {
                warnings.push(format!(
                    "rule {index}: '{state_name}' is assigned more than once; the last value wins"
                ));
            }
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{rule, rule_set};

    #[test]
    fn well_formed_rules_pass() {
        let rules = rule_set(vec![
            rule("btn1", &["$count < 3"], &[("$count", "$count + 1")]),
            rule("*", &[], &[]),
        ]);
        assert!(validate_rules(&rules).is_empty());
        assert!(lint_rules(&rules).is_empty());
    }

    #[test]
    fn unusable_targets_are_errors() {
        let rules = rule_set(vec![rule("a", &[], &[("", "1"), ("$a.b", "2")])]);
        assert_eq!(
            validate_rules(&rules),
            vec![
                "rule 0: update has no state name",
                "rule 0: update target '$a.b' must be a top-level name",
            ]
        );
    }

    #[test]
    fn suspicious_shapes_are_warnings() {
        let rules = rule_set(vec![rule("", &[], &[("count", "1"), ("count", "2")])]);
        assert!(validate_rules(&rules).is_empty());
        assert_eq!(
            lint_rules(&rules),
            vec![
                "rule 0: empty origin never matches",
                "rule 0: target 'count' has no `$` prefix",
                "rule 0: target 'count' has no `$` prefix",
                "rule 0: 'count' is assigned more than once; the last value wins",
            ]
        );
    }
}
