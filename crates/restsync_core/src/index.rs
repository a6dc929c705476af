//! Equality indexes over collection models.
//!
//! An [`Index`] is a snapshot: it maps, per indexed attribute, every distinct
//! value to the models holding it. Collections rebuild it lazily after any
//! mutation.
//!
//! Primary keys get a second, looser table used for identity lookups: a
//! whole number and its decimal string name the same resource there, while
//! attribute queries keep matching values exactly.

use crate::model::Model;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write;

/// Bucket key for an attribute value.
///
/// Objects are keyed with sorted field names so structurally equal values
/// share a bucket regardless of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexKey {
    /// The attribute is missing.
    Absent,
    /// Canonical serialization of the value.
    Value(String),
}

impl IndexKey {
    /// Key for an optional attribute value.
    pub fn of(value: Option<&Value>) -> Self {
        match value {
            None => IndexKey::Absent,
            Some(value) => {
                let mut out = String::new();
                canonical(value, &mut out);
                IndexKey::Value(out)
            }
        }
    }

    /// Identity key for a primary key value.
    ///
    /// Strings key as their contents and whole numbers as their decimal
    /// form, so `1`, `1.0` and `"1"` share a key. Other values keep their
    /// canonical form.
    pub fn id(value: &Value) -> Self {
        match value {
            Value::String(id) => IndexKey::Value(id.clone()),
            Value::Number(number) => {
                let id = if let Some(n) = number.as_i64() {
                    n.to_string()
                } else if let Some(n) = number.as_u64() {
                    n.to_string()
                } else {
                    match number.as_f64() {
                        Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => (f as i64).to_string(),
                        _ => number.to_string(),
                    }
                };
                IndexKey::Value(id)
            }
            other => IndexKey::of(Some(other)),
        }
    }
}

fn canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", Value::String(key.clone()));
                canonical(&map[key], out);
            }
            out.push('}');
        }
        scalar => {
            let _ = write!(out, "{}", scalar);
        }
    }
}

/// Value-to-models lookup tables for a fixed set of attributes.
#[derive(Debug, Default)]
pub struct Index {
    trees: HashMap<String, HashMap<IndexKey, Vec<Model>>>,
    ids: HashMap<IndexKey, Vec<Model>>,
}

impl Index {
    /// Indexes `models` on `primary_key` and each of `attributes`.
    pub fn build<'a>(
        models: &[Model],
        primary_key: &'a str,
        attributes: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut ids: HashMap<IndexKey, Vec<Model>> = HashMap::new();
        for model in models {
            if let Some(id) = model.attribute(primary_key) {
                ids.entry(IndexKey::id(&id)).or_default().push(model.clone());
            }
        }

        let mut trees = HashMap::new();
        for attribute in std::iter::once(primary_key).chain(attributes) {
            if trees.contains_key(attribute) {
                continue;
            }
            let mut tree: HashMap<IndexKey, Vec<Model>> = HashMap::new();
            for model in models {
                let key = IndexKey::of(model.attribute(attribute).as_ref());
                tree.entry(key).or_default().push(model.clone());
            }
            trees.insert(attribute.to_string(), tree);
        }
        Self { trees, ids }
    }

    /// Models whose primary key identifies as `id`, in collection order.
    pub fn by_id(&self, id: &Value) -> &[Model] {
        self.id_bucket(&IndexKey::id(id))
    }

    /// Models stored under the identity `key`.
    pub fn id_bucket(&self, key: &IndexKey) -> &[Model] {
        self.ids.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether `attribute` is indexed.
    pub fn is_indexed(&self, attribute: &str) -> bool {
        self.trees.contains_key(attribute)
    }

    /// Indexed attribute names.
    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.trees.keys().map(String::as_str)
    }

    /// Models whose `attribute` equals `value`, in collection order.
    ///
    /// `None` when the attribute is not indexed.
    pub fn lookup(&self, attribute: &str, value: &Value) -> Option<&[Model]> {
        self.bucket(attribute, &IndexKey::of(Some(value)))
    }

    /// Models stored under `key` for `attribute`.
    ///
    /// `None` when the attribute is not indexed; an empty slice when no
    /// model has the key.
    pub fn bucket(&self, attribute: &str, key: &IndexKey) -> Option<&[Model]> {
        let tree = self.trees.get(attribute)?;
        Some(tree.get(key).map(Vec::as_slice).unwrap_or(&[]))
    }

    /// Distinct keys for `attribute`.
    pub fn keys(&self, attribute: &str) -> Vec<&IndexKey> {
        self.trees
            .get(attribute)
            .map(|tree| tree.keys().collect())
            .unwrap_or_default()
    }
}
