//! Translation between model attributes and the wire format.

use crate::attributes::Attributes;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Pairs a model attribute with its name on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Attribute name on the model.
    pub model: String,
    /// Field name in API payloads.
    pub api: String,
}

impl FieldMapping {
    /// Creates a mapping.
    pub fn new(model: impl Into<String>, api: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api: api.into(),
        }
    }
}

/// Bidirectional payload translation.
///
/// Models call `model_to_api` on request bodies and `api_to_model` on
/// response bodies. Implementations must be pure.
pub trait ModelMapper: Send + Sync {
    /// Converts model attributes into an API payload.
    fn model_to_api(&self, model: &Attributes, mapping: &[FieldMapping]) -> Result<Attributes>;

    /// Converts an API payload into model attributes.
    fn api_to_model(&self, api: &Attributes, mapping: &[FieldMapping]) -> Result<Attributes>;
}

/// Mapper that renames fields pairwise.
///
/// Only mapped fields are carried across; fields absent from the source are
/// skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldMapper;

impl ModelMapper for FieldMapper {
    fn model_to_api(&self, model: &Attributes, mapping: &[FieldMapping]) -> Result<Attributes> {
        Ok(mapping
            .iter()
            .filter_map(|m| model.get(&m.model).map(|v| (m.api.clone(), v.clone())))
            .collect())
    }

    fn api_to_model(&self, api: &Attributes, mapping: &[FieldMapping]) -> Result<Attributes> {
        Ok(mapping
            .iter()
            .filter_map(|m| api.get(&m.api).map(|v| (m.model.clone(), v.clone())))
            .collect())
    }
}
