//! Options for network operations.

use serde_json::Value;

/// Options for [`Model::save`](crate::Model::save).
#[derive(Debug, Clone, PartialEq)]
pub struct SaveOptions {
    /// Apply the new attributes before the server answers.
    pub optimistic: bool,
    /// Send only the changes (`PATCH`) instead of the full resource (`PUT`).
    pub patch: bool,
    /// Re-apply edits made while the request was in flight.
    pub keep_changes: bool,
    /// Overrides the model URL.
    pub path: Option<String>,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            optimistic: true,
            patch: true,
            keep_changes: false,
            path: None,
        }
    }
}

impl SaveOptions {
    /// Creates the default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether the update is optimistic.
    #[must_use]
    pub fn optimistic(mut self, value: bool) -> Self {
        self.optimistic = value;
        self
    }

    /// Sets whether to patch instead of put.
    #[must_use]
    pub fn patch(mut self, value: bool) -> Self {
        self.patch = value;
        self
    }

    /// Sets whether racing local edits survive the response.
    #[must_use]
    pub fn keep_changes(mut self, value: bool) -> Self {
        self.keep_changes = value;
        self
    }

    /// Sets the request path.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Options for [`Model::destroy`](crate::Model::destroy).
#[derive(Debug, Clone, PartialEq)]
pub struct DestroyOptions {
    /// Remove from the collection before the server answers.
    pub optimistic: bool,
    /// Body sent with the request.
    pub data: Option<Value>,
    /// Overrides the model URL.
    pub path: Option<String>,
}

impl Default for DestroyOptions {
    fn default() -> Self {
        Self {
            optimistic: true,
            data: None,
            path: None,
        }
    }
}

impl DestroyOptions {
    /// Creates the default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether the removal is optimistic.
    #[must_use]
    pub fn optimistic(mut self, value: bool) -> Self {
        self.optimistic = value;
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Sets the request path.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Which parts of [`Collection::set`](crate::Collection::set) run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOptions {
    /// Add resources with unknown ids.
    pub add: bool,
    /// Merge resources into existing models.
    pub change: bool,
    /// Remove models whose id is not in the incoming set.
    pub remove: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            add: true,
            change: true,
            remove: true,
        }
    }
}

impl SetOptions {
    /// Creates the default options (everything enabled).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            add: true,
            change: true,
            remove: true,
        }
    }

    /// Sets whether unknown resources are added.
    #[must_use]
    pub const fn add(mut self, value: bool) -> Self {
        self.add = value;
        self
    }

    /// Sets whether known resources are merged.
    #[must_use]
    pub const fn change(mut self, value: bool) -> Self {
        self.change = value;
        self
    }

    /// Sets whether missing resources are removed.
    #[must_use]
    pub const fn remove(mut self, value: bool) -> Self {
        self.remove = value;
        self
    }
}

/// Options for fetching a model or a collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOptions {
    /// Query data handed to the adapter.
    pub data: Option<Value>,
    /// Reconciliation options (collections only).
    pub set: SetOptions,
}

impl FetchOptions {
    /// Creates the default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the query data.
    #[must_use]
    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Sets the reconciliation options.
    #[must_use]
    pub fn set(mut self, set: SetOptions) -> Self {
        self.set = set;
        self
    }
}

/// Options for [`Collection::create`](crate::Collection::create).
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOptions {
    /// Insert into the collection before the server answers.
    pub optimistic: bool,
    /// Overrides the collection URL.
    pub path: Option<String>,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            optimistic: true,
            path: None,
        }
    }
}

impl CreateOptions {
    /// Creates the default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether the insertion is optimistic.
    #[must_use]
    pub fn optimistic(mut self, value: bool) -> Self {
        self.optimistic = value;
        self
    }

    /// Sets the request path.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl From<CreateOptions> for SaveOptions {
    fn from(options: CreateOptions) -> Self {
        SaveOptions {
            optimistic: options.optimistic,
            path: options.path,
            ..SaveOptions::default()
        }
    }
}

/// Label used for RPC requests unless overridden.
pub const RPC_LABEL: &str = "updating";

/// Options for `rpc` calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcOptions {
    /// Body sent with the request.
    pub data: Option<Value>,
    /// Label the request is tracked under.
    pub label: String,
}

impl Default for RpcOptions {
    fn default() -> Self {
        Self {
            data: None,
            label: RPC_LABEL.to_string(),
        }
    }
}

impl RpcOptions {
    /// Creates the default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the request body.
    #[must_use]
    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Sets the tracking label.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// Target of an `rpc` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Appended to the owner's URL.
    Path(String),
    /// Used as the full URL.
    Root(String),
}

impl Endpoint {
    /// An absolute URL, ignoring the owner's URL.
    pub fn root(url: impl Into<String>) -> Self {
        Endpoint::Root(url.into())
    }

    pub(crate) fn resolve(&self, base: impl FnOnce() -> crate::Result<String>) -> crate::Result<String> {
        match self {
            Endpoint::Path(path) => Ok(format!("{}/{}", base()?, path)),
            Endpoint::Root(url) => Ok(url.clone()),
        }
    }
}

impl From<&str> for Endpoint {
    fn from(path: &str) -> Self {
        Endpoint::Path(path.to_string())
    }
}

impl From<String> for Endpoint {
    fn from(path: String) -> Self {
        Endpoint::Path(path)
    }
}
