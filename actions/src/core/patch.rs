//! Structural merge of partial documents and change detection.
//!
//! A [`Patch`] maps top-level keys to [`PatchOp`]s. Merging never mutates the
//! input document: [`merge`] returns a new document and [`diff_top_level`]
//! reports which top-level keys differ between the two.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde_json::{Map, Value};

use crate::error::StoreError;

/// The state document: top-level state variables mapped to JSON values.
pub type Document = Map<String, Value>;

/// Computes a key's next value from its current one. Returning `None` removes
/// the key.
pub type ComputeFn = Box<dyn FnOnce(Option<&Value>) -> Option<Value>>;

/// What a patch does to one key.
pub enum PatchOp {
    /// Replace the value outright.
    Set(Value),
    /// Merge field-by-field into the current object (or into `{}` when the
    /// current value is not an object).
    Merge(Patch),
    /// Delete the key.
    Remove,
    /// Keep the current value when present, otherwise use this default.
    Default(Value),
    /// Derive the value from the current one.
    Compute(ComputeFn),
}

impl fmt::Debug for PatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchOp::Set(value) => f.debug_tuple("Set").field(value).finish(),
            PatchOp::Merge(patch) => f.debug_tuple("Merge").field(patch).finish(),
            PatchOp::Remove => f.write_str("Remove"),
            PatchOp::Default(value) => f.debug_tuple("Default").field(value).finish(),
            PatchOp::Compute(_) => f.write_str("Compute(..)"),
        }
    }
}

/// A partial document. Inserting the same key twice keeps the later op.
#[derive(Debug, Default)]
pub struct Patch {
    ops: BTreeMap<String, PatchOp>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a patch from a JSON object using merge semantics for nested
    /// objects. Anything other than an object is a programming error.
    pub fn from_value(value: Value) -> Result<Self, StoreError> {
        match value {
            Value::Object(map) => Ok(Self::from_map(map)),
            other => Err(StoreError::PatchType(json_type_name(&other))),
        }
    }

    pub fn from_map(map: Document) -> Self {
        let mut patch = Self::new();
        for (key, value) in map {
            patch.insert_assign(key, value);
        }
        patch
    }

    /// Assign `value` to `key`: objects merge into the current value, every
    /// other value replaces it.
    pub fn assign(mut self, key: impl Into<String>, value: Value) -> Self {
        self.insert_assign(key.into(), value);
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.ops.insert(key.into(), PatchOp::Set(value));
        self
    }

    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.ops.insert(key.into(), PatchOp::Remove);
        self
    }

    pub fn define(mut self, key: impl Into<String>, default: Value) -> Self {
        self.ops.insert(key.into(), PatchOp::Default(default));
        self
    }

    pub fn compute<F>(mut self, key: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(Option<&Value>) -> Option<Value> + 'static,
    {
        self.ops.insert(key.into(), PatchOp::Compute(Box::new(f)));
        self
    }

    pub fn insert_assign(&mut self, key: String, value: Value) {
        let op = match value {
            Value::Object(map) => PatchOp::Merge(Self::from_map(map)),
            other => PatchOp::Set(other),
        };
        self.ops.insert(key, op);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.ops.keys().map(String::as_str)
    }
}

/// Merge `patch` into a copy of `doc`.
pub fn merge(doc: &Document, patch: Patch) -> Document {
    let mut next = doc.clone();
    apply(&mut next, patch);
    next
}

fn apply(target: &mut Document, patch: Patch) {
    for (key, op) in patch.ops {
        match op {
            PatchOp::Set(value) => {
                target.insert(key, value);
            }
            PatchOp::Remove => {
                target.shift_remove(&key);
            }
            PatchOp::Default(default) => {
                if !target.contains_key(&key) {
                    target.insert(key, default);
                }
            }
            PatchOp::Compute(f) => match f(target.get(&key)) {
                Some(value) => {
                    target.insert(key, value);
                }
                None => {
                    target.shift_remove(&key);
                }
            },
            PatchOp::Merge(nested) => {
                let slot = target
                    .entry(key)
                    .or_insert_with(|| Value::Object(Map::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Map::new());
                }
                if let Value::Object(inner) = slot {
                    apply(inner, nested);
                }
            }
        }
    }
}

/// Top-level keys whose value changed during one update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    keys: BTreeSet<String>,
}

impl ChangeSet {
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    /// True if any of `names` is in the set.
    pub fn intersects<S: AsRef<str>>(&self, names: &[S]) -> bool {
        names.iter().any(|name| self.contains(name.as_ref()))
    }
}

impl FromIterator<String> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

/// Keys whose values differ between `before` and `after`, plus keys removed.
pub fn diff_top_level(before: &Document, after: &Document) -> ChangeSet {
    let mut keys = BTreeSet::new();
    for (key, value) in after {
        if before.get(key) != Some(value) {
            keys.insert(key.clone());
        }
    }
    for key in before.keys() {
        if !after.contains_key(key) {
            keys.insert(key.clone());
        }
    }
    ChangeSet { keys }
}

/// The top-level state name of a possibly dotted path.
pub fn top_level(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

/// Resolve a dotted path. Numeric segments index into arrays.
pub fn lookup_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture must be an object"),
        }
    }

    #[test]
    fn empty_patch_changes_nothing() {
        let before = doc(json!({"$a": 1}));
        let after = merge(&before, Patch::new());
        assert_eq!(after, before);
        assert!(diff_top_level(&before, &after).is_empty());
    }

    #[test]
    fn nested_objects_merge_field_by_field() {
        let before = doc(json!({"$user": {"name": "ann", "age": 7}}));
        let patch = Patch::from_value(json!({"$user": {"age": 8}})).expect("patch");
        let after = merge(&before, patch);
        assert_eq!(after["$user"], json!({"name": "ann", "age": 8}));
    }

    #[test]
    fn arrays_replace_rather_than_merge() {
        let before = doc(json!({"$list": [1, 2, 3]}));
        let after = merge(&before, Patch::new().assign("$list", json!([9])));
        assert_eq!(after["$list"], json!([9]));
    }

    #[test]
    fn object_assigned_over_scalar_starts_fresh() {
        let before = doc(json!({"$x": 3}));
        let after = merge(&before, Patch::new().assign("$x", json!({"a": 1})));
        assert_eq!(after["$x"], json!({"a": 1}));
    }

    #[test]
    fn change_set_reports_changed_and_removed_keys_only() {
        let before = doc(json!({"$same": 1, "$changed": 1, "$gone": true}));
        let patch = Patch::new()
            .set("$same", json!(1))
            .set("$changed", json!(2))
            .set("$new", json!("x"))
            .remove("$gone");
        let after = merge(&before, patch);
        let changes = diff_top_level(&before, &after);
        let keys: Vec<&str> = changes.iter().collect();
        assert_eq!(keys, vec!["$changed", "$gone", "$new"]);
    }

    #[test]
    fn nested_equal_value_is_not_a_change() {
        let before = doc(json!({"$user": {"name": "ann"}}));
        let after = merge(&before, Patch::new().assign("$user", json!({"name": "ann"})));
        assert!(diff_top_level(&before, &after).is_empty());
    }

    #[test]
    fn default_keeps_present_values_even_when_falsy() {
        let before = doc(json!({"$zero": 0}));
        let after = merge(
            &before,
            Patch::new()
                .define("$zero", json!(5))
                .define("$fresh", json!(5)),
        );
        assert_eq!(after["$zero"], json!(0));
        assert_eq!(after["$fresh"], json!(5));
    }

    #[test]
    fn compute_sees_current_value_and_can_remove() {
        let before = doc(json!({"$n": 2, "$drop": 1}));
        let patch = Patch::new()
            .compute("$n", |current| {
                let n = current.and_then(Value::as_i64).unwrap_or(0);
                Some(json!(n * 10))
            })
            .compute("$drop", |_| None);
        let after = merge(&before, patch);
        assert_eq!(after["$n"], json!(20));
        assert!(!after.contains_key("$drop"));
    }

    #[test]
    fn later_duplicate_key_wins() {
        let patch = Patch::new().set("$x", json!(1)).set("$x", json!(2));
        assert_eq!(patch.len(), 1);
        let after = merge(&Document::new(), patch);
        assert_eq!(after["$x"], json!(2));
    }

    #[test]
    fn non_object_patch_is_rejected() {
        let err = Patch::from_value(json!([1, 2])).expect_err("array patch");
        assert!(matches!(err, StoreError::PatchType("array")));
    }

    #[test]
    fn lookup_path_walks_objects_and_arrays() {
        let d = doc(json!({"$a": {"b": [10, {"c": "deep"}]}}));
        assert_eq!(lookup_path(&d, "$a.b.1.c"), Some(&json!("deep")));
        assert_eq!(lookup_path(&d, "$a.b.0"), Some(&json!(10)));
        assert_eq!(lookup_path(&d, "$a.missing.c"), None);
        assert_eq!(lookup_path(&d, "$none"), None);
    }

    #[test]
    fn top_level_strips_dotted_suffix() {
        assert_eq!(top_level("$user.name"), "$user");
        assert_eq!(top_level("$plain"), "$plain");
    }
}
