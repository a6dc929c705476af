//! Attribute store for a single model.
//!
//! An [`AttributeStore`] keeps two snapshots of the model data:
//! - the *working* attributes, edited locally
//! - the *committed* attributes, matching the last known server state
//!
//! Both snapshots are owned `serde_json` maps, so cloning one into the other
//! never shares nested values. Changes are always computed on read.

use crate::error::{Error, Result};
use serde_json::{Map, Value};

/// Ordered attribute map backing a model.
pub type Attributes = Map<String, Value>;

/// Converts a JSON value into an attribute map.
///
/// Fails with [`Error::InvalidPayload`] when the value is not an object.
pub fn from_value(value: Value) -> Result<Attributes> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::InvalidPayload(format!(
            "expected an object, got {}",
            kind(&other)
        ))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Returns whether a value counts as "set" for identity purposes.
///
/// `null`, `false`, `0`, `NaN` and the empty string are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Working and committed attribute snapshots of one model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeStore {
    defaults: Attributes,
    working: Attributes,
    committed: Attributes,
}

impl AttributeStore {
    /// Creates a store holding `attributes` merged over `defaults`.
    ///
    /// The result is committed immediately.
    pub fn new(defaults: Attributes, attributes: Attributes) -> Self {
        let mut working = defaults.clone();
        working.extend(attributes);
        let committed = working.clone();
        Self {
            defaults,
            working,
            committed,
        }
    }

    /// Returns the attribute value, failing loudly if it is absent.
    pub fn get(&self, key: &str) -> Result<&Value> {
        self.working.get(key).ok_or_else(|| Error::AttributeNotFound {
            attribute: key.to_string(),
        })
    }

    /// Returns whether the attribute is present.
    pub fn has(&self, key: &str) -> bool {
        self.working.contains_key(key)
    }

    /// Returns the working attributes.
    pub fn working(&self) -> &Attributes {
        &self.working
    }

    /// Returns the committed attributes.
    pub fn committed(&self) -> &Attributes {
        &self.committed
    }

    /// Returns the default attributes.
    pub fn defaults(&self) -> &Attributes {
        &self.defaults
    }

    /// Shallow-merges `data` into the working attributes.
    ///
    /// Existing keys are overwritten, new keys are added, and keys absent
    /// from `data` are left untouched.
    pub fn set(&mut self, data: Attributes) {
        self.working.extend(data);
    }

    /// Replaces the working attributes.
    ///
    /// With `data`, the working set becomes `defaults ∪ data`. Without it,
    /// the working set reverts to the last committed snapshot.
    pub fn reset(&mut self, data: Option<Attributes>) {
        self.working = match data {
            Some(data) => {
                let mut merged = self.defaults.clone();
                merged.extend(data);
                merged
            }
            None => self.committed.clone(),
        };
    }

    /// Reverts the working attributes to the defaults.
    pub fn clear(&mut self) {
        self.working = self.defaults.clone();
    }

    /// Replaces the working attributes wholesale.
    pub fn replace(&mut self, attributes: Attributes) {
        self.working = attributes;
    }

    /// Copies the working attributes into the committed snapshot.
    pub fn commit(&mut self) {
        self.committed = self.working.clone();
    }

    /// Copies the committed snapshot back over the working attributes.
    pub fn discard(&mut self) {
        self.working = self.committed.clone();
    }

    /// Keys whose values differ between the committed and working snapshots.
    pub fn changed_attributes(&self) -> Vec<String> {
        changed_attributes_between(&self.committed, &self.working)
    }

    /// Uncommitted changes, with nested objects diffed recursively.
    pub fn changes(&self) -> Attributes {
        changes_between(&self.committed, &self.working)
    }

    /// Returns whether `key` (or, with `None`, any key) has uncommitted changes.
    pub fn has_changes(&self, key: Option<&str>) -> bool {
        match key {
            Some(key) => self.working.get(key) != self.committed.get(key),
            None => !self.changed_attributes().is_empty(),
        }
    }
}

/// Keys present in either map whose values are not structurally equal.
///
/// Keys from `source` come first, followed by keys only present in `target`.
pub fn changed_attributes_between(source: &Attributes, target: &Attributes) -> Vec<String> {
    source
        .keys()
        .chain(target.keys().filter(|key| !source.contains_key(*key)))
        .filter(|key| source.get(*key) != target.get(*key))
        .cloned()
        .collect()
}

/// Diff from `source` to `target`.
///
/// Each changed key maps to its `target` value, except when both sides hold
/// objects: then the value is the nested diff. Arrays are atomic. A key
/// missing from `target` maps to `null`.
pub fn changes_between(source: &Attributes, target: &Attributes) -> Attributes {
    changed_attributes_between(source, target)
        .into_iter()
        .map(|key| {
            let value = match (source.get(&key), target.get(&key)) {
                (Some(Value::Object(old)), Some(Value::Object(new))) => {
                    Value::Object(changes_between(old, new))
                }
                (_, Some(new)) => new.clone(),
                (_, None) => Value::Null,
            };
            (key, value)
        })
        .collect()
}

/// Deep-merges `changes` over `base`.
///
/// Objects are merged key by key at every level. Arrays and scalars from
/// `changes` replace the base value outright; arrays are never concatenated.
pub fn apply_patch(base: &Attributes, changes: &Attributes) -> Attributes {
    let mut merged = base.clone();
    for (key, value) in changes {
        let next = match (merged.get(key), value) {
            (Some(Value::Object(old)), Value::Object(new)) => Value::Object(apply_patch(old, new)),
            _ => value.clone(),
        };
        merged.insert(key.clone(), next);
    }
    merged
}
