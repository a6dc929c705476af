//! Shared context injected into models and collections.

use crate::adapter::Adapter;
use crate::mapper::{FieldMapping, ModelMapper};
use crate::error::Result;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Adapter plus optional mapper, shared by every model and collection built
/// from it.
///
/// Cloning is cheap.
#[derive(Clone)]
pub struct Client {
    adapter: Arc<dyn Adapter>,
    mapper: Option<Arc<dyn ModelMapper>>,
}

impl Client {
    /// Creates a client around `adapter`.
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        Self {
            adapter,
            mapper: None,
        }
    }

    /// Sets the model mapper.
    #[must_use]
    pub fn with_mapper(mut self, mapper: Arc<dyn ModelMapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    /// The transport.
    pub fn adapter(&self) -> &dyn Adapter {
        self.adapter.as_ref()
    }

    /// The model mapper, if one is configured.
    pub fn mapper(&self) -> Option<&dyn ModelMapper> {
        self.mapper.as_deref()
    }

    /// Maps an outgoing body. Passes `data` through unless a mapper is set,
    /// `mapping` is non-empty and `data` is an object.
    pub(crate) fn to_api(&self, data: Value, mapping: &[FieldMapping]) -> Result<Value> {
        match (self.mapper(), data) {
            (Some(mapper), Value::Object(map)) if !mapping.is_empty() => {
                Ok(Value::Object(mapper.model_to_api(&map, mapping)?))
            }
            (_, data) => Ok(data),
        }
    }

    /// Maps an incoming body, with the same pass-through rules as `to_api`.
    pub(crate) fn to_model(&self, data: Value, mapping: &[FieldMapping]) -> Result<Value> {
        match (self.mapper(), data) {
            (Some(mapper), Value::Object(map)) if !mapping.is_empty() => {
                Ok(Value::Object(mapper.api_to_model(&map, mapping)?))
            }
            (_, data) => Ok(data),
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("mapper", &self.mapper.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MockAdapter;
    use crate::mapper::FieldMapper;
    use serde_json::json;

    #[test]
    fn passes_through_without_mapper() {
        let client = Client::new(Arc::new(MockAdapter::new()));
        let mapping = vec![FieldMapping::new("a", "b")];
        assert_eq!(client.to_api(json!({"a": 1}), &mapping).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn maps_objects_when_configured() {
        let client = Client::new(Arc::new(MockAdapter::new())).with_mapper(Arc::new(FieldMapper));
        let mapping = vec![FieldMapping::new("a", "b")];
        assert_eq!(client.to_api(json!({"a": 1}), &mapping).unwrap(), json!({"b": 1}));
        assert_eq!(client.to_model(json!({"b": 1}), &mapping).unwrap(), json!({"a": 1}));
        assert_eq!(client.to_model(json!([1]), &mapping).unwrap(), json!([1]));
        assert_eq!(client.to_model(json!({"b": 1}), &[]).unwrap(), json!({"b": 1}));
    }
}
