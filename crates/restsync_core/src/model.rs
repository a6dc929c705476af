//! Models: single REST resources with local attribute state.
//!
//! A [`Model`] wraps an [`AttributeStore`] with identity, URL resolution and
//! the fetch/save/destroy/rpc protocol. Network operations follow the same
//! shape:
//!
//! 1. optimistic mutations are applied synchronously
//! 2. the adapter call is registered as a [`Request`]
//! 3. on success the response is merged and committed; on failure the
//!    optimistic mutations are rolled back
//!
//! The returned [`Request`] settles only after step 3, so awaiting it always
//! observes the reconciled state.

use crate::adapter::{CallOptions, Method};
use crate::attributes::{apply_patch, changes_between, from_value, is_truthy, AttributeStore, Attributes};
use crate::client::Client;
use crate::collection::{Collection, CollectionInner};
use crate::error::{Error, Result};
use crate::events::{ModelEvent, Observers};
use crate::mapper::{FieldMapping, ModelMapper};
use crate::options::{DestroyOptions, Endpoint, FetchOptions, RpcOptions, SaveOptions};
use crate::request::{ensure_runtime, Request, RequestTracker};
use crate::schema::Schema;
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Client-side identity assigned to every model at construction.
///
/// Stays the same for the lifetime of the model, whether or not the server
/// has assigned an id.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct OptimisticId(Uuid);

impl OptimisticId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for OptimisticId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i_{}", self.0.simple())
    }
}

impl fmt::Debug for OptimisticId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OptimisticId({})", self)
    }
}

struct ModelInner {
    client: Client,
    schema: Arc<Schema>,
    optimistic_id: OptimisticId,
    store: RwLock<AttributeStore>,
    collection: RwLock<Weak<CollectionInner>>,
    requests: RequestTracker,
    observers: Observers<ModelEvent>,
}

/// A single remote resource.
///
/// `Model` is a shared handle: clones refer to the same entity, and
/// equality is identity.
#[derive(Clone)]
pub struct Model {
    inner: Arc<ModelInner>,
}

impl Model {
    /// Creates a model from `attributes` merged over the schema defaults.
    pub fn new(client: &Client, schema: impl Into<Arc<Schema>>, attributes: Attributes) -> Self {
        let schema = schema.into();
        let store = AttributeStore::new(schema.defaults().clone(), attributes);
        Self {
            inner: Arc::new(ModelInner {
                client: client.clone(),
                schema,
                optimistic_id: OptimisticId::new(),
                store: RwLock::new(store),
                collection: RwLock::new(Weak::new()),
                requests: RequestTracker::new(),
                observers: Observers::new(),
            }),
        }
    }

    /// The schema this model was built from.
    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// The client used for requests.
    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    /// Permanent client-side id.
    pub fn optimistic_id(&self) -> OptimisticId {
        self.inner.optimistic_id
    }

    /// Primary key attribute name.
    pub fn primary_key(&self) -> &str {
        self.inner.schema.primary_key()
    }

    /// Returns whether both handles refer to the same model.
    pub fn ptr_eq(&self, other: &Model) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn as_ptr(&self) -> *const () {
        Arc::as_ptr(&self.inner).cast()
    }

    /// Returns the attribute value.
    ///
    /// Fails with [`Error::AttributeNotFound`] when the attribute is absent;
    /// use [`has`](Self::has) or [`attribute`](Self::attribute) for optional
    /// access.
    pub fn get(&self, attribute: &str) -> Result<Value> {
        self.inner.store.read().get(attribute).cloned()
    }

    /// Returns the attribute value if present.
    pub fn attribute(&self, attribute: &str) -> Option<Value> {
        self.inner.store.read().working().get(attribute).cloned()
    }

    /// Returns whether the attribute is present.
    pub fn has(&self, attribute: &str) -> bool {
        self.inner.store.read().has(attribute)
    }

    /// Copy of the working attributes.
    pub fn attributes(&self) -> Attributes {
        self.inner.store.read().working().clone()
    }

    /// Copy of the committed attributes.
    pub fn committed_attributes(&self) -> Attributes {
        self.inner.store.read().committed().clone()
    }

    /// Working attributes as a JSON object.
    pub fn to_json(&self) -> Value {
        Value::Object(self.attributes())
    }

    /// Server id if present, otherwise the optimistic id.
    pub fn id(&self) -> Value {
        self.attribute(self.primary_key())
            .unwrap_or_else(|| Value::String(self.inner.optimistic_id.to_string()))
    }

    /// True when the primary key is absent or falsy.
    pub fn is_new(&self) -> bool {
        !self
            .attribute(self.primary_key())
            .is_some_and(|id| is_truthy(&id))
    }

    /// Shallow-merges `data` into the working attributes.
    pub fn set(&self, data: Attributes) {
        if data.is_empty() {
            return;
        }
        let keys = data.keys().cloned().collect();
        self.inner.store.write().set(data);
        self.notify(ModelEvent::Changed { keys });
    }

    /// Replaces the working attributes with `defaults ∪ data`, or reverts to
    /// the last committed snapshot when `data` is `None`.
    pub fn reset(&self, data: Option<Attributes>) {
        self.inner.store.write().reset(data);
        self.notify(ModelEvent::Replaced);
    }

    /// Reverts the working attributes to the schema defaults.
    pub fn clear(&self) {
        self.inner.store.write().clear();
        self.notify(ModelEvent::Replaced);
    }

    /// Marks the working attributes as synced.
    pub fn commit_changes(&self) {
        self.inner.store.write().commit();
        self.inner.observers.emit(ModelEvent::Committed);
    }

    /// Drops uncommitted edits.
    pub fn discard_changes(&self) {
        self.inner.store.write().discard();
        self.notify(ModelEvent::Replaced);
    }

    /// Names of attributes with uncommitted changes.
    pub fn changed_attributes(&self) -> Vec<String> {
        self.inner.store.read().changed_attributes()
    }

    /// Uncommitted changes, diffed recursively through nested objects.
    pub fn changes(&self) -> Attributes {
        self.inner.store.read().changes()
    }

    /// Whether `attribute` (or any attribute, with `None`) has uncommitted
    /// changes.
    pub fn has_changes(&self, attribute: Option<&str>) -> bool {
        self.inner.store.read().has_changes(attribute)
    }

    fn restore(&self, snapshot: Attributes) {
        self.inner.store.write().replace(snapshot);
        self.notify(ModelEvent::Replaced);
    }

    fn notify(&self, event: ModelEvent) {
        self.inner.observers.emit(event);
        if let Some(collection) = self.collection() {
            collection.invalidate_index();
        }
    }

    /// Receives an event after every attribute mutation.
    pub fn subscribe(&self) -> Receiver<ModelEvent> {
        self.inner.observers.subscribe()
    }

    /// The collection this model belongs to.
    pub fn collection(&self) -> Option<Collection> {
        self.inner
            .collection
            .read()
            .upgrade()
            .map(Collection::from_inner)
    }

    pub(crate) fn attach(&self, collection: &Collection) {
        *self.inner.collection.write() = Arc::downgrade(&collection.inner);
    }

    pub(crate) fn detach(&self) {
        *self.inner.collection.write() = Weak::new();
    }

    pub(crate) fn belongs_to(&self, collection: &Collection) -> bool {
        self.inner.collection.read().as_ptr() == Arc::as_ptr(&collection.inner)
    }

    /// Requests in flight for this model.
    pub fn requests(&self) -> &RequestTracker {
        &self.inner.requests
    }

    /// Most recent request, while pending.
    pub fn request(&self) -> Option<Request> {
        self.inner.requests.latest()
    }

    /// First active request carrying `label`.
    pub fn get_request(&self, label: &str) -> Option<Request> {
        self.inner.requests.get_request(label)
    }

    /// All active requests carrying `label`.
    pub fn get_all_requests(&self, label: &str) -> Vec<Request> {
        self.inner.requests.get_all_requests(label)
    }

    /// Whether a request carrying `label` is active.
    pub fn is_request(&self, label: &str) -> bool {
        self.inner.requests.is_request(label)
    }

    /// Error of the last settled request, if it failed.
    pub fn error(&self) -> Option<Error> {
        self.inner.requests.last_error()
    }

    /// The schema URL root, ignoring empty strings.
    pub fn url_root(&self) -> Option<&str> {
        self.inner.schema.url_root().filter(|root| !root.is_empty())
    }

    /// URL of this resource.
    ///
    /// Uses the schema URL root, or the owning collection's URL. Persisted
    /// models get `/{id}` appended.
    pub fn url(&self) -> Result<String> {
        let root = match self.url_root() {
            Some(root) => root.to_string(),
            None => self.collection().map(|c| c.url()).ok_or(Error::MissingUrl)?,
        };

        if self.is_new() {
            return Ok(root);
        }
        let id = self.get(self.primary_key())?;
        Ok(format!("{}/{}", root, path_segment(&id)))
    }

    /// Fetches the resource and commits the response.
    pub fn fetch(&self, options: FetchOptions) -> Result<Request> {
        ensure_runtime()?;
        let url = self.url()?;
        let field_map = self.schema().field_map();
        let data = options
            .data
            .map(|data| self.inner.client.to_api(data, field_map))
            .transpose()?;

        let (request, settle) = Request::pending(["fetching"]);
        let call = self
            .inner
            .client
            .adapter()
            .get(&url, data.clone(), call_options(&request));
        tracing::debug!(%url, "fetching model");

        let model = self.clone();
        Ok(self
            .inner
            .requests
            .spawn(request, settle, call, data, move |outcome| {
                let response = model.map_response(outcome?)?;
                if let Value::Object(attributes) = &response {
                    model.set(attributes.clone());
                    model.commit_changes();
                }
                Ok(response)
            }))
    }

    /// Saves the resource.
    ///
    /// New models are created with `POST`; when they belong to a collection
    /// the collection's create path is used so it tracks the request too.
    /// Persisted models are updated with `PATCH` (only `attributes`, or the
    /// uncommitted changes) or `PUT` (everything).
    pub fn save(&self, attributes: Option<Attributes>, options: SaveOptions) -> Result<Request> {
        if self.is_new() {
            if let Some(collection) = self.collection() {
                return collection.create_model(self.clone(), attributes, options);
            }
        }
        self.save_request(attributes, options, None)
    }

    /// Starts a save. `shared` also tracks the request until it settles.
    pub(crate) fn save_request(
        &self,
        attributes: Option<Attributes>,
        options: SaveOptions,
        shared: Option<RequestTracker>,
    ) -> Result<Request> {
        ensure_runtime()?;
        let SaveOptions {
            optimistic,
            patch,
            keep_changes,
            path,
        } = options;
        let is_new = self.is_new();
        let collection = self.collection();
        let (current, changes) = {
            let store = self.inner.store.read();
            (store.working().clone(), store.changes())
        };

        let data = match (&attributes, patch && !is_new) {
            (Some(attributes), true) => attributes.clone(),
            (None, true) => changes,
            (attributes, false) => {
                let mut merged = current.clone();
                if let Some(attributes) = attributes {
                    merged.extend(attributes.clone());
                }
                merged
            }
        };
        let method = if is_new {
            Method::Post
        } else if patch {
            Method::Patch
        } else {
            Method::Put
        };
        let url = match path {
            Some(path) => path,
            None => self.url()?,
        };
        let body = self
            .inner
            .client
            .to_api(Value::Object(data), self.schema().field_map())?;

        if optimistic {
            if let Some(attributes) = &attributes {
                self.set(if patch {
                    apply_patch(&current, attributes)
                } else {
                    attributes.clone()
                });
            }
        }
        let inserted = match &collection {
            Some(collection) if optimistic => !collection.add([self.clone()]).is_empty(),
            _ => false,
        };

        let label = if is_new { "creating" } else { "updating" };
        let (request, settle) = Request::pending(["saving", label]);
        let call = self.inner.client.adapter().call(
            method,
            &url,
            Some(body.clone()),
            call_options(&request),
        );
        tracing::debug!(?method, %url, optimistic, "saving model");

        let model = self.clone();
        Ok(self.inner.requests.spawn_shared(
            shared,
            request,
            settle,
            call,
            Some(body),
            move |outcome| {
                match outcome.and_then(|response| model.map_response(response)) {
                    Ok(response) => {
                        model.reconcile_save(&current, &response, keep_changes);
                        if !optimistic {
                            if let Some(collection) = &collection {
                                collection.add([model.clone()]);
                            }
                        }
                        Ok(response)
                    }
                    Err(error) => {
                        model.restore(current);
                        if inserted {
                            if let Some(collection) = &collection {
                                collection.remove([&model]);
                            }
                        }
                        Err(error)
                    }
                }
            },
        ))
    }

    /// Merges the server response, commits, and re-applies edits that raced
    /// with the request when `keep_changes` is set.
    fn reconcile_save(&self, before: &Attributes, response: &Value, keep_changes: bool) {
        let server = match response {
            Value::Object(attributes) => attributes.clone(),
            _ => Attributes::new(),
        };
        let racing = changes_between(before, &self.attributes());

        self.set(server.clone());
        self.commit_changes();
        if keep_changes {
            self.set(apply_patch(&server, &racing));
        }
    }

    /// Deletes the resource.
    ///
    /// A new model is only removed from its collection. Otherwise a `DELETE`
    /// is issued; optimistic removals are undone if it fails.
    pub fn destroy(&self, options: DestroyOptions) -> Result<Request> {
        let DestroyOptions {
            optimistic,
            data,
            path,
        } = options;
        let collection = self.collection();

        if self.is_new() {
            if let Some(collection) = &collection {
                collection.remove([self]);
            }
            return Ok(Request::resolved(["destroying"], Value::Null));
        }
        ensure_runtime()?;

        // Resolve the URL while the model still belongs to its collection.
        let url = match path {
            Some(path) => path,
            None => self.url()?,
        };
        let body = data
            .map(|data| self.inner.client.to_api(data, self.schema().field_map()))
            .transpose()?;

        let removed = match &collection {
            Some(collection) if optimistic => !collection.remove([self]).is_empty(),
            _ => false,
        };

        let (request, settle) = Request::pending(["destroying"]);
        let call = self
            .inner
            .client
            .adapter()
            .del(&url, body.clone(), call_options(&request));
        tracing::debug!(%url, optimistic, "destroying model");

        let model = self.clone();
        Ok(self
            .inner
            .requests
            .spawn(request, settle, call, body, move |outcome| {
                match outcome.and_then(|response| model.map_response(response)) {
                    Ok(response) => {
                        if !optimistic {
                            if let Some(collection) = &collection {
                                collection.remove([&model]);
                            }
                        }
                        Ok(response)
                    }
                    Err(error) => {
                        if removed {
                            if let Some(collection) = &collection {
                                collection.add([model.clone()]);
                            }
                        }
                        Err(error)
                    }
                }
            }))
    }

    /// Posts to a non-REST endpoint below this resource, or to an absolute
    /// URL. The response is returned as-is.
    pub fn rpc(&self, endpoint: impl Into<Endpoint>, options: RpcOptions) -> Result<Request> {
        ensure_runtime()?;
        let url = endpoint.into().resolve(|| self.url())?;
        let RpcOptions { data, label } = options;

        let (request, settle) = Request::pending([label]);
        let call = self
            .inner
            .client
            .adapter()
            .post(&url, data.clone(), call_options(&request));
        tracing::debug!(%url, "model rpc");

        Ok(self
            .inner
            .requests
            .spawn(request, settle, call, data, |outcome| outcome))
    }

    /// Working attributes translated by the model mapper.
    ///
    /// Fails if no mapper is configured or the schema has no field map.
    pub fn to_api_object(&self) -> Result<Attributes> {
        let (mapper, field_map) = self.strict_mapper()?;
        mapper.model_to_api(&self.attributes(), field_map)
    }

    /// API payload translated into model attributes by the model mapper.
    ///
    /// Fails if no mapper is configured or the schema has no field map.
    pub fn to_model_object(&self, data: Value) -> Result<Attributes> {
        let (mapper, field_map) = self.strict_mapper()?;
        mapper.api_to_model(&from_value(data)?, field_map)
    }

    fn strict_mapper(&self) -> Result<(&dyn ModelMapper, &[FieldMapping])> {
        let mapper = self
            .inner
            .client
            .mapper()
            .ok_or_else(|| Error::Mapping("no model mapper configured".into()))?;
        let field_map = self.schema().field_map();
        if field_map.is_empty() {
            return Err(Error::Mapping("undefined model map".into()));
        }
        Ok((mapper, field_map))
    }

    fn map_response(&self, response: Value) -> Result<Value> {
        self.inner
            .client
            .to_model(response, self.schema().field_map())
    }
}

fn call_options(request: &Request) -> CallOptions {
    CallOptions::default().with_progress(request.progress_reporter())
}

fn path_segment(id: &Value) -> String {
    match id {
        Value::String(id) => id.clone(),
        other => other.to_string(),
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Model {}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("optimistic_id", &self.inner.optimistic_id)
            .field("attributes", self.inner.store.read().working())
            .finish()
    }
}
