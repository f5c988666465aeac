//! Rule documents: the persisted design tree, its typed form, and the
//! compiled form the engine evaluates.
//!
//! The design tree is a generic `className`-tagged node structure. Loading
//! maps each tag to a [`NodeKind`] through [`CLASS_TABLE`]; anything not in
//! the table is rejected.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::expr::CompiledExpr;
use crate::error::{LoadError, RuleDiagnostic};

/// Origin that matches every event source.
pub const WILDCARD_ORIGIN: &str = "*";

/// One node of the persisted design tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignNode {
    #[serde(rename = "className")]
    pub class_name: String,
    #[serde(default)]
    pub props: Map<String, Value>,
    #[serde(default)]
    pub children: Vec<DesignNode>,
}

impl DesignNode {
    pub fn new(class_name: &str, props: Map<String, Value>, children: Vec<DesignNode>) -> Self {
        Self {
            class_name: class_name.to_string(),
            props,
            children,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Actions,
    Action,
    ActionCondition,
    ActionUpdate,
}

/// Persisted `className` → node kind.
pub const CLASS_TABLE: &[(&str, NodeKind)] = &[
    ("Actions", NodeKind::Actions),
    ("Action", NodeKind::Action),
    ("ActionCondition", NodeKind::ActionCondition),
    ("ActionUpdate", NodeKind::ActionUpdate),
];

pub fn node_kind(class_name: &str) -> Option<NodeKind> {
    CLASS_TABLE
        .iter()
        .find(|(name, _)| *name == class_name)
        .map(|(_, kind)| *kind)
}

fn class_name(kind: NodeKind) -> &'static str {
    CLASS_TABLE
        .iter()
        .find(|(_, k)| *k == kind)
        .map_or("Unknown", |(name, _)| name)
}

/// A child of a rule, in authoring order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleChild {
    Condition { expression: String },
    Update { state_name: String, new_value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub origin: String,
    pub children: Vec<RuleChild>,
}

impl Rule {
    pub fn conditions(&self) -> impl Iterator<Item = &str> {
        self.children.iter().filter_map(|child| match child {
            RuleChild::Condition { expression } => Some(expression.as_str()),
            RuleChild::Update { .. } => None,
        })
    }

    pub fn updates(&self) -> impl Iterator<Item = (&str, &str)> {
        self.children.iter().filter_map(|child| match child {
            RuleChild::Update {
                state_name,
                new_value,
            } => Some((state_name.as_str(), new_value.as_str())),
            RuleChild::Condition { .. } => None,
        })
    }
}

/// Rules in priority (authoring) order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
}

impl RuleSet {
    /// Build the typed rule set from a canonical design tree.
    pub fn from_design(root: &DesignNode) -> Result<Self, LoadError> {
        expect_kind(root, NodeKind::Actions, "root")?;
        let mut rules = Vec::with_capacity(root.children.len());
        for (index, action) in root.children.iter().enumerate() {
            let path = format!("root/{index}");
            expect_kind(action, NodeKind::Action, &path)?;
            let origin = string_prop(action, "origin", &path)?;
            let mut children = Vec::with_capacity(action.children.len());
            for (child_index, child) in action.children.iter().enumerate() {
                let child_path = format!("{path}/{child_index}");
                let kind = node_kind(&child.class_name).ok_or_else(|| LoadError::UnknownClass {
                    class_name: child.class_name.clone(),
                    path: child_path.clone(),
                })?;
                children.push(match kind {
                    NodeKind::ActionCondition => RuleChild::Condition {
                        expression: string_prop(child, "Condition", &child_path)?,
                    },
                    NodeKind::ActionUpdate => RuleChild::Update {
                        state_name: string_prop(child, "stateName", &child_path)?,
                        new_value: string_prop(child, "newValue", &child_path)?,
                    },
                    NodeKind::Actions | NodeKind::Action => {
                        return Err(LoadError::MisplacedClass {
                            class_name: child.class_name.clone(),
                            path: child_path,
                        });
                    }
                });
            }
            rules.push(Rule { origin, children });
        }
        Ok(Self { rules })
    }

    /// The canonical design tree for this rule set.
    pub fn to_design(&self) -> DesignNode {
        let actions = self
            .rules
            .iter()
            .map(|rule| {
                let children = rule
                    .children
                    .iter()
                    .map(|child| match child {
                        RuleChild::Condition { expression } => DesignNode::new(
                            class_name(NodeKind::ActionCondition),
                            props([("Condition", expression)]),
                            Vec::new(),
                        ),
                        RuleChild::Update {
                            state_name,
                            new_value,
                        } => DesignNode::new(
                            class_name(NodeKind::ActionUpdate),
                            props([("stateName", state_name), ("newValue", new_value)]),
                            Vec::new(),
                        ),
                    })
                    .collect();
                DesignNode::new(
                    class_name(NodeKind::Action),
                    props([("origin", &rule.origin)]),
                    children,
                )
            })
            .collect();
        DesignNode::new(class_name(NodeKind::Actions), Map::new(), actions)
    }

    /// Parse every expression. All parse errors are collected so a rule
    /// author sees every problem at once.
    pub fn compile(&self) -> Result<CompiledRules, LoadError> {
        let mut diagnostics = Vec::new();
        let mut compiled = Vec::with_capacity(self.rules.len());
        for (index, rule) in self.rules.iter().enumerate() {
            let mut conditions = Vec::new();
            for (position, source) in rule.conditions().enumerate() {
                match CompiledExpr::parse(source) {
                    Ok(expr) => conditions.push(expr),
                    Err(error) => diagnostics.push(RuleDiagnostic {
                        rule: index,
                        location: format!("condition {position}"),
                        error,
                    }),
                }
            }
            let mut updates = Vec::new();
            for (state_name, source) in rule.updates() {
                match CompiledExpr::parse(source) {
                    Ok(value) => updates.push(CompiledUpdate {
                        state_name: state_name.to_string(),
                        value,
                    }),
                    Err(error) => diagnostics.push(RuleDiagnostic {
                        rule: index,
                        location: format!("update {state_name}"),
                        error,
                    }),
                }
            }
            compiled.push(CompiledRule {
                index,
                origin: OriginFilter::parse(&rule.origin),
                conditions,
                updates,
            });
        }
        if !diagnostics.is_empty() {
            return Err(LoadError::Compile(diagnostics));
        }
        Ok(CompiledRules { rules: compiled })
    }

    /// Every `$name` token mentioned by a condition or update expression,
    /// plus every update target. Text extraction only; nothing is evaluated.
    pub fn state_references(&self) -> BTreeSet<String> {
        static STATE_TOKEN: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"\$\w+").expect("static regex"));

        let mut names = BTreeSet::new();
        let mut scan = |text: &str| {
            for found in STATE_TOKEN.find_iter(text) {
                names.insert(found.as_str().to_string());
            }
        };
        for rule in &self.rules {
            for condition in rule.conditions() {
                scan(condition);
            }
            for (_, new_value) in rule.updates() {
                scan(new_value);
            }
        }
        for rule in &self.rules {
            for (state_name, _) in rule.updates() {
                names.insert(state_name.to_string());
            }
        }
        names
    }
}

fn expect_kind(node: &DesignNode, expected: NodeKind, path: &str) -> Result<(), LoadError> {
    match node_kind(&node.class_name) {
        Some(kind) if kind == expected => Ok(()),
        Some(_) => Err(LoadError::MisplacedClass {
            class_name: node.class_name.clone(),
            path: path.to_string(),
        }),
        None => Err(LoadError::UnknownClass {
            class_name: node.class_name.clone(),
            path: path.to_string(),
        }),
    }
}

/// Read a string prop; a missing prop reads as `""`.
fn string_prop(node: &DesignNode, prop: &str, path: &str) -> Result<String, LoadError> {
    match node.props.get(prop) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(LoadError::InvalidProp {
            path: path.to_string(),
            prop: prop.to_string(),
        }),
    }
}

fn props<const N: usize>(entries: [(&str, &String); N]) -> Map<String, Value> {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), Value::String(value.clone())))
        .collect()
}

/// Which event origins a rule accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginFilter {
    Any,
    Named(String),
}

impl OriginFilter {
    pub fn parse(origin: &str) -> Self {
        if origin == WILDCARD_ORIGIN {
            OriginFilter::Any
        } else {
            OriginFilter::Named(origin.to_string())
        }
    }

    pub fn matches(&self, origin: &str) -> bool {
        match self {
            OriginFilter::Any => true,
            OriginFilter::Named(name) => name == origin,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledUpdate {
    pub state_name: String,
    pub value: CompiledExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRule {
    /// Position in declaration order.
    pub index: usize,
    pub origin: OriginFilter,
    pub conditions: Vec<CompiledExpr>,
    pub updates: Vec<CompiledUpdate>,
}

/// Rules ready for dispatch. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledRules {
    rules: Vec<CompiledRule>,
}

impl CompiledRules {
    pub fn iter(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{rule, rule_set};
    use serde_json::json;

    fn design(value: Value) -> DesignNode {
        serde_json::from_value(value).expect("design node")
    }

    #[test]
    fn loads_canonical_design_tree() {
        let root = design(json!({
            "className": "Actions",
            "props": {},
            "children": [{
                "className": "Action",
                "props": {"origin": "btn1"},
                "children": [
                    {"className": "ActionCondition", "props": {"Condition": "$count < 3"}, "children": []},
                    {"className": "ActionUpdate", "props": {"stateName": "$count", "newValue": "$count + 1"}, "children": []}
                ]
            }]
        }));
        let rules = RuleSet::from_design(&root).expect("load");
        assert_eq!(rules.rules.len(), 1);
        let first = &rules.rules[0];
        assert_eq!(first.origin, "btn1");
        assert_eq!(first.conditions().collect::<Vec<_>>(), vec!["$count < 3"]);
        assert_eq!(
            first.updates().collect::<Vec<_>>(),
            vec![("$count", "$count + 1")]
        );
    }

    #[test]
    fn design_tree_round_trips_through_typed_form() {
        let rules = rule_set(vec![
            rule("btn1", &["$a"], &[("$b", "1")]),
            rule("*", &[], &[("$c", "'x'")]),
        ]);
        let reloaded = RuleSet::from_design(&rules.to_design()).expect("reload");
        assert_eq!(reloaded, rules);
    }

    #[test]
    fn rejects_unknown_and_misplaced_classes() {
        let unknown = design(json!({
            "className": "Actions",
            "children": [{"className": "Action", "children": [{"className": "Speech"}]}]
        }));
        assert!(matches!(
            RuleSet::from_design(&unknown),
            Err(LoadError::UnknownClass { ref path, .. }) if path == "root/0/0"
        ));

        let misplaced = design(json!({
            "className": "Actions",
            "children": [{"className": "ActionUpdate"}]
        }));
        assert!(matches!(
            RuleSet::from_design(&misplaced),
            Err(LoadError::MisplacedClass { .. })
        ));
    }

    #[test]
    fn rejects_non_string_props() {
        let root = design(json!({
            "className": "Actions",
            "children": [{"className": "Action", "props": {"origin": 7}}]
        }));
        assert!(matches!(
            RuleSet::from_design(&root),
            Err(LoadError::InvalidProp { ref prop, .. }) if prop == "origin"
        ));
    }

    #[test]
    fn compile_collects_every_parse_error() {
        let rules = rule_set(vec![
            rule("a", &["$x <"], &[("$y", "1")]),
            rule("b", &["$ok"], &[("$z", "(")]),
        ]);
        let Err(LoadError::Compile(diagnostics)) = rules.compile() else {
            panic!("expected compile error");
        };
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].rule, 0);
        assert_eq!(diagnostics[0].location, "condition 0");
        assert_eq!(diagnostics[1].rule, 1);
        assert_eq!(diagnostics[1].location, "update $z");
    }

    #[test]
    fn wildcard_origin_matches_everything() {
        assert!(OriginFilter::parse("*").matches("anything"));
        assert!(OriginFilter::parse("btn").matches("btn"));
        assert!(!OriginFilter::parse("btn").matches("other"));
    }

    #[test]
    fn state_references_cover_conditions_updates_and_targets() {
        let rules = rule_set(vec![
            rule("a", &["$mode == 'edit' && $count < 3"], &[("$count", "$count + $step")]),
            rule("b", &[], &[("$label", "#label")]),
        ]);
        let refs: Vec<String> = rules.state_references().into_iter().collect();
        assert_eq!(refs, vec!["$count", "$label", "$mode", "$step"]);
    }
}
