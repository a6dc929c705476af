//! Per-model-type configuration.

use crate::attributes::Attributes;
use crate::mapper::FieldMapping;

/// Default primary key attribute.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// Describes one kind of model: its identity, location and defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    primary_key: String,
    url_root: Option<String>,
    defaults: Attributes,
    field_map: Vec<FieldMapping>,
}

impl Schema {
    /// Creates a schema keyed by `id`, with no URL root and no defaults.
    pub fn new() -> Self {
        Self {
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
            url_root: None,
            defaults: Attributes::new(),
            field_map: Vec::new(),
        }
    }

    /// Sets the primary key attribute.
    #[must_use]
    pub fn with_primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = key.into();
        self
    }

    /// Sets the URL root used when the model has no collection.
    #[must_use]
    pub fn with_url_root(mut self, url_root: impl Into<String>) -> Self {
        self.url_root = Some(url_root.into());
        self
    }

    /// Sets the default attributes.
    #[must_use]
    pub fn with_defaults(mut self, defaults: Attributes) -> Self {
        self.defaults = defaults;
        self
    }

    /// Sets the field mapping handed to the model mapper.
    #[must_use]
    pub fn with_field_map(mut self, field_map: Vec<FieldMapping>) -> Self {
        self.field_map = field_map;
        self
    }

    /// Primary key attribute.
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// URL root, if set.
    pub fn url_root(&self) -> Option<&str> {
        self.url_root.as_deref()
    }

    /// Default attributes.
    pub fn defaults(&self) -> &Attributes {
        &self.defaults
    }

    /// Field mapping.
    pub fn field_map(&self) -> &[FieldMapping] {
        &self.field_map
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}
