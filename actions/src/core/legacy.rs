//! One-time migration of the flat legacy rule format.
//!
//! Legacy documents are a JSON array of
//! `{event, origin, conditions: [..], updates: {state: value}}` records.
//! The canonical form is the `Actions` design tree. Upgrading never mutates
//! the input; a document already in canonical form passes through.

use serde_json::{Map, Value};

use crate::core::patch::json_type_name;
use crate::core::rules::{DesignNode, Rule, RuleChild, RuleSet};
use crate::core::types::INIT_EVENT;
use crate::error::LoadError;

/// True when `document` is in the legacy flat-array format.
pub fn is_legacy(document: &Value) -> bool {
    document.is_array()
}

/// Parse a rule document, upgrading the legacy format when needed.
pub fn upgrade(document: Value) -> Result<DesignNode, LoadError> {
    match document {
        Value::Array(records) => {
            let rules = records
                .iter()
                .enumerate()
                .map(|(index, record)| upgrade_record(index, record))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(RuleSet { rules }.to_design())
        }
        Value::Object(_) => Ok(serde_json::from_value(document)?),
        other => Err(LoadError::Legacy(format!(
            "expected an array or an object, got {}",
            json_type_name(&other)
        ))),
    }
}

fn upgrade_record(index: usize, record: &Value) -> Result<Rule, LoadError> {
    let Value::Object(fields) = record else {
        return Err(LoadError::Legacy(format!(
            "record {index}: expected an object, got {}",
            json_type_name(record)
        )));
    };

    let mut children = Vec::new();
    for condition in array_field(index, fields, "conditions")? {
        children.push(RuleChild::Condition {
            expression: text(condition),
        });
    }
    match fields.get("updates") {
        None | Some(Value::Null) => {}
        Some(Value::Object(updates)) => {
            for (state_name, value) in updates {
                children.push(RuleChild::Update {
                    state_name: state_name.clone(),
                    new_value: text(value),
                });
            }
        }
        Some(other) => {
            return Err(LoadError::Legacy(format!(
                "record {index}: `updates` must be an object, got {}",
                json_type_name(other)
            )));
        }
    }

    let event = fields.get("event").and_then(Value::as_str);
    let origin = if event == Some(INIT_EVENT) {
        INIT_EVENT.to_string()
    } else {
        fields
            .get("origin")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    Ok(Rule { origin, children })
}

fn array_field<'a>(
    index: usize,
    fields: &'a Map<String, Value>,
    name: &str,
) -> Result<&'a [Value], LoadError> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(LoadError::Legacy(format!(
            "record {index}: `{name}` must be an array, got {}",
            json_type_name(other)
        ))),
    }
}

/// Expression text for a legacy value. Old exports sometimes stored
/// literals as JSON numbers or booleans.
fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
