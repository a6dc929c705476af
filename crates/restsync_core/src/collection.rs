//! Collections: ordered, indexed lists of models.
//!
//! A [`Collection`] owns the membership of its models (each model points back
//! to at most one collection) and reconciles server listings into local
//! state with [`Collection::set`]. Lookups go through a lazily rebuilt
//! [`Index`] keyed on the primary key plus any attributes named by
//! [`CollectionSpec::indexes`].

use crate::adapter::CallOptions;
use crate::attributes::{is_truthy, Attributes};
use crate::client::Client;
use crate::error::{Error, Result};
use crate::events::{CollectionEvent, Observers};
use crate::index::{Index, IndexKey};
use crate::model::Model;
use crate::options::{CreateOptions, Endpoint, FetchOptions, RpcOptions, SaveOptions, SetOptions};
use crate::request::{ensure_runtime, Request, RequestTracker};
use crate::schema::{Schema, DEFAULT_PRIMARY_KEY};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

/// Describes one kind of collection.
pub trait CollectionSpec: Send + Sync + 'static {
    /// REST resource root.
    fn url(&self) -> String;

    /// Schema for a model built from `attributes`.
    fn model(&self, attributes: &Attributes) -> Arc<Schema>;

    /// Attributes indexed in addition to the primary key.
    fn indexes(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Something a collection can hold: an existing model or raw attributes.
#[derive(Debug, Clone)]
pub enum Resource {
    /// An existing model.
    Model(Model),
    /// Attributes for a model to build.
    Attributes(Attributes),
}

impl Resource {
    fn attribute(&self, key: &str) -> Option<Value> {
        match self {
            Resource::Model(model) => model.attribute(key),
            Resource::Attributes(attributes) => attributes.get(key).cloned(),
        }
    }

    fn into_attributes(self) -> Attributes {
        match self {
            Resource::Model(model) => model.attributes(),
            Resource::Attributes(attributes) => attributes,
        }
    }
}

impl From<Model> for Resource {
    fn from(model: Model) -> Self {
        Resource::Model(model)
    }
}

impl From<&Model> for Resource {
    fn from(model: &Model) -> Self {
        Resource::Model(model.clone())
    }
}

impl From<Attributes> for Resource {
    fn from(attributes: Attributes) -> Self {
        Resource::Attributes(attributes)
    }
}

/// A model to remove, by reference or by id.
#[derive(Debug, Clone)]
pub enum Target {
    /// A model instance.
    Model(Model),
    /// A primary key value.
    Id(Value),
}

impl From<Model> for Target {
    fn from(model: Model) -> Self {
        Target::Model(model)
    }
}

impl From<&Model> for Target {
    fn from(model: &Model) -> Self {
        Target::Model(model.clone())
    }
}

impl From<Value> for Target {
    fn from(id: Value) -> Self {
        Target::Id(id)
    }
}

/// Selection for [`Collection::filter`] and [`Collection::find`].
pub enum Query<'a> {
    /// Arbitrary predicate, evaluated against every model.
    Predicate(Box<dyn Fn(&Model) -> bool + 'a>),
    /// Every listed attribute must be present and equal. Uses indexes where
    /// available.
    Match(Attributes),
}

impl<'a> Query<'a> {
    /// Wraps a predicate.
    pub fn predicate(predicate: impl Fn(&Model) -> bool + 'a) -> Self {
        Query::Predicate(Box::new(predicate))
    }
}

impl From<Attributes> for Query<'_> {
    fn from(conditions: Attributes) -> Self {
        Query::Match(conditions)
    }
}

impl fmt::Debug for Query<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Predicate(_) => f.write_str("Query::Predicate(..)"),
            Query::Match(conditions) => f.debug_tuple("Query::Match").field(conditions).finish(),
        }
    }
}

pub(crate) struct CollectionInner {
    client: Client,
    spec: Box<dyn CollectionSpec>,
    primary_key: String,
    indexes: Vec<String>,
    models: RwLock<Vec<Model>>,
    generation: AtomicU64,
    index: Mutex<Option<(u64, Arc<Index>)>>,
    requests: RequestTracker,
    observers: Observers<CollectionEvent>,
}

/// An ordered list of models backed by a REST resource.
///
/// `Collection` is a shared handle; clones refer to the same list.
#[derive(Clone)]
pub struct Collection {
    pub(crate) inner: Arc<CollectionInner>,
}

impl Collection {
    /// Creates an empty collection.
    pub fn new(client: &Client, spec: impl CollectionSpec) -> Self {
        let primary_key = spec
            .model(&Attributes::new())
            .primary_key()
            .to_string();
        let indexes = spec.indexes();
        Self {
            inner: Arc::new(CollectionInner {
                client: client.clone(),
                spec: Box::new(spec),
                primary_key,
                indexes,
                models: RwLock::new(Vec::new()),
                generation: AtomicU64::new(0),
                index: Mutex::new(None),
                requests: RequestTracker::new(),
                observers: Observers::new(),
            }),
        }
    }

    /// Creates a collection and populates it with [`set`](Self::set).
    pub fn with_data<I, R>(client: &Client, spec: impl CollectionSpec, data: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Resource>,
    {
        let collection = Self::new(client, spec);
        collection.set(data, SetOptions::default());
        collection
    }

    pub(crate) fn from_inner(inner: Arc<CollectionInner>) -> Self {
        Self { inner }
    }

    /// Returns whether both handles refer to the same collection.
    pub fn ptr_eq(&self, other: &Collection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// REST resource root.
    pub fn url(&self) -> String {
        self.inner.spec.url()
    }

    /// Primary key of the model schema. Defaults to `id`.
    pub fn primary_key(&self) -> &str {
        if self.inner.primary_key.is_empty() {
            DEFAULT_PRIMARY_KEY
        } else {
            &self.inner.primary_key
        }
    }

    /// Number of models.
    pub fn len(&self) -> usize {
        self.inner.models.read().len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.models.read().is_empty()
    }

    /// Snapshot of the models, in order.
    pub fn models(&self) -> Vec<Model> {
        self.inner.models.read().clone()
    }

    /// Model at `position`.
    pub fn at(&self, position: usize) -> Option<Model> {
        self.inner.models.read().get(position).cloned()
    }

    /// Ids of every model, in order.
    pub fn ids(&self) -> Vec<Value> {
        self.models().iter().map(Model::id).collect()
    }

    /// Working attributes of every model as a JSON array.
    pub fn to_json(&self) -> Value {
        Value::Array(self.models().iter().map(Model::to_json).collect())
    }

    /// Maps every model.
    pub fn map<T>(&self, f: impl FnMut(&Model) -> T) -> Vec<T> {
        self.models().iter().map(f).collect()
    }

    /// Visits every model.
    pub fn for_each(&self, f: impl FnMut(&Model)) {
        self.models().iter().for_each(f);
    }

    /// Current index snapshot, rebuilt if the collection changed.
    pub fn index(&self) -> Arc<Index> {
        let generation = self.inner.generation.load(Ordering::Acquire);
        let mut cached = self.inner.index.lock();
        if let Some((built, index)) = cached.as_ref() {
            if *built == generation {
                return index.clone();
            }
        }

        let attributes = self.inner.indexes.iter().map(String::as_str);
        let index = Arc::new(Index::build(&self.models(), self.primary_key(), attributes));
        *cached = Some((generation, index.clone()));
        index
    }

    pub(crate) fn invalidate_index(&self) {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn changed(&self, event: CollectionEvent) {
        self.invalidate_index();
        self.inner.observers.emit(event);
    }

    /// Receives an event after every membership change.
    pub fn subscribe(&self) -> Receiver<CollectionEvent> {
        self.inner.observers.subscribe()
    }

    /// Model with the given id.
    ///
    /// Matches the primary key first, then optimistic ids. Whole numbers
    /// and their decimal strings are the same id, so `get("1")` finds the
    /// model with id `1`.
    pub fn get(&self, id: impl Into<Value>) -> Option<Model> {
        let id = id.into();
        if let Some(model) = self.index().by_id(&id).first() {
            return Some(model.clone());
        }

        match &id {
            Value::String(id) => self
                .models()
                .into_iter()
                .find(|model| model.optimistic_id().to_string() == *id),
            _ => None,
        }
    }

    /// Like [`get`](Self::get), failing with [`Error::ModelNotFound`].
    pub fn must_get(&self, id: impl Into<Value>) -> Result<Model> {
        let id = id.into();
        self.get(id.clone()).ok_or_else(|| Error::ModelNotFound {
            key: self.primary_key().to_string(),
            value: id,
        })
    }

    /// Models matching `query`, in collection order.
    pub fn filter<'a>(&self, query: impl Into<Query<'a>>) -> Vec<Model> {
        match query.into() {
            Query::Predicate(predicate) => self
                .models()
                .into_iter()
                .filter(|model| predicate(model))
                .collect(),
            Query::Match(conditions) => self.filter_matching(&conditions),
        }
    }

    /// First model matching `query`.
    pub fn find<'a>(&self, query: impl Into<Query<'a>>) -> Option<Model> {
        match query.into() {
            Query::Predicate(predicate) => {
                self.models().into_iter().find(|model| predicate(model))
            }
            Query::Match(conditions) => self.filter_matching(&conditions).into_iter().next(),
        }
    }

    /// Like [`find`](Self::find), failing with [`Error::NoMatch`].
    pub fn must_find<'a>(&self, query: impl Into<Query<'a>>) -> Result<Model> {
        self.find(query).ok_or(Error::NoMatch)
    }

    fn filter_matching(&self, conditions: &Attributes) -> Vec<Model> {
        let index = self.index();
        let mut plan: Vec<(&String, &Value)> = conditions.iter().collect();
        plan.sort_by_key(|(attribute, _)| !index.is_indexed(attribute));

        let mut candidates: Option<Vec<Model>> = None;
        for (attribute, value) in plan {
            let next: Vec<Model> = match index.lookup(attribute, value) {
                Some(bucket) => match candidates {
                    None => bucket.to_vec(),
                    Some(current) => {
                        let hits: HashSet<*const ()> = bucket.iter().map(Model::as_ptr).collect();
                        current
                            .into_iter()
                            .filter(|model| hits.contains(&model.as_ptr()))
                            .collect()
                    }
                },
                None => candidates
                    .unwrap_or_else(|| self.models())
                    .into_iter()
                    .filter(|model| model.attribute(attribute).as_ref() == Some(value))
                    .collect(),
            };
            if next.is_empty() {
                return next;
            }
            candidates = Some(next);
        }
        candidates.unwrap_or_else(|| self.models())
    }

    /// Converts `resource` into a model owned by this collection, without
    /// inserting it.
    pub fn build(&self, resource: impl Into<Resource>) -> Model {
        let model = match resource.into() {
            Resource::Model(model) => model,
            Resource::Attributes(attributes) => {
                let schema = self.inner.spec.model(&attributes);
                Model::new(&self.inner.client, schema, attributes)
            }
        };
        model.attach(self);
        model
    }

    /// Appends resources. Models already in the list are skipped.
    ///
    /// Returns the models that were actually inserted.
    pub fn add<I, R>(&self, items: I) -> Vec<Model>
    where
        I: IntoIterator<Item = R>,
        R: Into<Resource>,
    {
        let built: Vec<Model> = items.into_iter().map(|item| self.build(item)).collect();
        let added = {
            let mut models = self.inner.models.write();
            let mut added = Vec::new();
            for model in built {
                if models.iter().any(|m| m.ptr_eq(&model)) || added.iter().any(|m: &Model| m.ptr_eq(&model)) {
                    continue;
                }
                models.push(model.clone());
                added.push(model);
            }
            added
        };

        if !added.is_empty() {
            self.changed(CollectionEvent::Added {
                ids: added.iter().map(Model::id).collect(),
            });
        }
        added
    }

    /// Replaces the whole list. Models not carried over are detached.
    pub fn reset<I, R>(&self, items: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<Resource>,
    {
        let mut next: Vec<Model> = Vec::new();
        for item in items {
            let model = self.build(item);
            if !next.iter().any(|m| m.ptr_eq(&model)) {
                next.push(model);
            }
        }

        let previous = std::mem::replace(&mut *self.inner.models.write(), next.clone());
        for model in previous {
            if !next.iter().any(|m| m.ptr_eq(&model)) && model.belongs_to(self) {
                model.detach();
            }
        }
        self.changed(CollectionEvent::Reset { len: next.len() });
    }

    /// Removes models by reference or id.
    ///
    /// Unknown targets are skipped with a warning. Returns the models that
    /// were actually removed.
    pub fn remove<I, T>(&self, targets: I) -> Vec<Model>
    where
        I: IntoIterator<Item = T>,
        T: Into<Target>,
    {
        let resolved: Vec<Model> = targets
            .into_iter()
            .filter_map(|target| match target.into() {
                Target::Model(model) if model.belongs_to(self) => Some(model),
                Target::Model(model) => {
                    tracing::warn!(id = %model.id(), "model does not belong to collection");
                    None
                }
                Target::Id(id) => {
                    let found = self.get(id.clone());
                    if found.is_none() {
                        tracing::warn!(key = self.primary_key(), %id, "model not found");
                    }
                    found
                }
            })
            .collect();

        let removed = {
            let mut models = self.inner.models.write();
            let mut removed = Vec::new();
            for model in resolved {
                match models.iter().position(|m| m.ptr_eq(&model)) {
                    Some(position) => {
                        models.remove(position);
                        removed.push(model);
                    }
                    None => tracing::warn!(id = %model.id(), "model not in collection"),
                }
            }
            removed
        };

        for model in &removed {
            model.detach();
        }
        if !removed.is_empty() {
            self.changed(CollectionEvent::Removed {
                ids: removed.iter().map(Model::id).collect(),
            });
        }
        removed
    }

    /// Reconciles the collection with a server listing.
    ///
    /// Models whose truthy id is missing from `items` are removed, known
    /// ids are merged, unknown resources are appended in order. A resource
    /// without a truthy id is skipped when a member already holds exactly
    /// the attributes it would be built with, so repeating a listing is a
    /// no-op.
    pub fn set<I, R>(&self, items: I, options: SetOptions)
    where
        I: IntoIterator<Item = R>,
        R: Into<Resource>,
    {
        let resources: Vec<Resource> = items.into_iter().map(Into::into).collect();
        let primary_key = self.primary_key().to_string();

        if options.remove {
            let incoming: HashSet<IndexKey> = resources
                .iter()
                .filter_map(|resource| resource.attribute(&primary_key))
                .filter(is_truthy)
                .map(|id| IndexKey::id(&id))
                .collect();
            let stale: Vec<Model> = self
                .models()
                .into_iter()
                .filter(|model| {
                    model
                        .attribute(&primary_key)
                        .filter(is_truthy)
                        .is_some_and(|id| !incoming.contains(&IndexKey::id(&id)))
                })
                .collect();
            if !stale.is_empty() {
                self.remove(stale);
            }
        }

        let index = self.index();
        let mut pending: Vec<Model> = Vec::new();
        let mut pending_ids: HashMap<IndexKey, Model> = HashMap::new();
        for resource in resources {
            let key = resource
                .attribute(&primary_key)
                .filter(is_truthy)
                .map(|id| IndexKey::id(&id));
            let existing = key.as_ref().and_then(|key| {
                index
                    .id_bucket(key)
                    .first()
                    .cloned()
                    .or_else(|| pending_ids.get(key).cloned())
            });

            match existing {
                Some(model) => {
                    if options.change {
                        model.set(resource.into_attributes());
                    }
                }
                None if options.add => {
                    if key.is_none() && self.holds_unsaved(&resource, &pending) {
                        tracing::warn!("skipping resource without id equal to an existing model");
                        continue;
                    }
                    let model = self.build(resource);
                    if let Some(key) = key {
                        pending_ids.insert(key, model.clone());
                    }
                    pending.push(model);
                }
                None => {}
            }
        }

        if !pending.is_empty() {
            self.add(pending);
        }
    }

    /// Whether a member or a `pending` model already holds the attributes a
    /// model built from the id-less `resource` would start with.
    fn holds_unsaved(&self, resource: &Resource, pending: &[Model]) -> bool {
        let Resource::Attributes(attributes) = resource else {
            return false;
        };
        let mut built = self.inner.spec.model(attributes).defaults().clone();
        built.extend(attributes.clone());
        let built = Value::Object(built);
        self.models()
            .iter()
            .chain(pending)
            .any(|model| model.to_json() == built)
    }

    /// Builds a model from `resource` and saves it with `POST`.
    ///
    /// Optimistic creates insert the model immediately and remove it again
    /// if the request fails.
    pub fn create(&self, resource: impl Into<Resource>, options: CreateOptions) -> Result<Request> {
        ensure_runtime()?;
        let model = self.build(resource);
        self.create_model(model, None, options.into())
    }

    pub(crate) fn create_model(
        &self,
        model: Model,
        attributes: Option<Attributes>,
        options: SaveOptions,
    ) -> Result<Request> {
        model.save_request(attributes, options, Some(self.inner.requests.clone()))
    }

    /// Fetches the listing and reconciles it with [`set`](Self::set).
    ///
    /// Array elements that are not objects are skipped.
    pub fn fetch(&self, options: FetchOptions) -> Result<Request> {
        ensure_runtime()?;
        let FetchOptions { data, set } = options;
        let url = self.url();

        let (request, settle) = Request::pending(["fetching"]);
        let call = self
            .inner
            .client
            .adapter()
            .get(&url, data.clone(), call_options(&request));
        tracing::debug!(%url, "fetching collection");

        let collection = self.clone();
        Ok(self
            .inner
            .requests
            .spawn(request, settle, call, data, move |outcome| {
                let response = outcome?;
                if let Value::Array(items) = &response {
                    let resources = items
                        .iter()
                        .filter_map(|item| collection.map_item(item))
                        .collect::<Result<Vec<Attributes>>>()?;
                    collection.set(resources, set);
                }
                Ok(response)
            }))
    }

    fn map_item(&self, item: &Value) -> Option<Result<Attributes>> {
        let Value::Object(attributes) = item else {
            tracing::warn!(%item, "skipping non-object listing element");
            return None;
        };
        let schema = self.inner.spec.model(attributes);
        let mapped = self
            .inner
            .client
            .to_model(item.clone(), schema.field_map())
            .and_then(crate::attributes::from_value);
        Some(mapped)
    }

    /// Posts to a non-REST endpoint below the collection URL, or to an
    /// absolute URL.
    pub fn rpc(&self, endpoint: impl Into<Endpoint>, options: RpcOptions) -> Result<Request> {
        ensure_runtime()?;
        let url = endpoint.into().resolve(|| Ok(self.url()))?;
        let RpcOptions { data, label } = options;

        let (request, settle) = Request::pending([label]);
        let call = self
            .inner
            .client
            .adapter()
            .post(&url, data.clone(), call_options(&request));
        tracing::debug!(%url, "collection rpc");

        Ok(self
            .inner
            .requests
            .spawn(request, settle, call, data, |outcome| outcome))
    }

    /// Requests in flight for this collection, including creates.
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
}

fn call_options(request: &Request) -> CallOptions {
    CallOptions::default().with_progress(request.progress_reporter())
}

impl PartialEq for Collection {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Collection {}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("url", &self.url())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Method, MockAdapter};
    use crate::attributes::from_value;
    use crate::options::DestroyOptions;
    use serde_json::json;

    struct Users {
        indexes: Vec<String>,
    }

    impl CollectionSpec for Users {
        fn url(&self) -> String {
            "/users".into()
        }

        fn model(&self, _attributes: &Attributes) -> Arc<Schema> {
            Arc::new(Schema::new())
        }

        fn indexes(&self) -> Vec<String> {
            self.indexes.clone()
        }
    }

    fn attrs(value: Value) -> Attributes {
        from_value(value).unwrap()
    }

    fn list(value: Value) -> Vec<Attributes> {
        match value {
            Value::Array(items) => items.into_iter().map(attrs).collect(),
            _ => panic!("expected array"),
        }
    }

    fn setup(indexes: &[&str]) -> (Arc<MockAdapter>, Collection) {
        let adapter = Arc::new(MockAdapter::new());
        let client = Client::new(adapter.clone());
        let users = Collection::new(
            &client,
            Users {
                indexes: indexes.iter().map(|s| s.to_string()).collect(),
            },
        );
        (adapter, users)
    }

    #[test]
    fn add_get_and_dedup() {
        let (_, users) = setup(&[]);
        let added = users.add(list(json!([{"id": 1}, {"id": 2}])));
        assert_eq!(added.len(), 2);

        let again = users.add([added[0].clone()]);
        assert!(again.is_empty());
        assert_eq!(users.len(), 2);

        assert!(users.get(1).unwrap().ptr_eq(&added[0]));
        assert!(users.get(3).is_none());
        assert!(added[0].collection().unwrap().ptr_eq(&users));
        assert!(matches!(users.must_get(3), Err(Error::ModelNotFound { .. })));
    }

    #[test]
    fn get_by_optimistic_id() {
        let (_, users) = setup(&[]);
        let model = users.add([attrs(json!({"name": "new"}))]).remove(0);
        let id = model.optimistic_id().to_string();
        assert!(users.get(id.as_str()).unwrap().ptr_eq(&model));
        assert_eq!(model.id(), json!(id));
    }

    #[test]
    fn index_tracks_attribute_changes() {
        let (_, users) = setup(&["role"]);
        let added = users.add(list(json!([{"id": 1, "role": "a"}, {"id": 2, "role": "b"}])));

        assert_eq!(users.filter(attrs(json!({"role": "a"}))).len(), 1);
        added[1].set(attrs(json!({"role": "a"})));
        let admins = users.filter(attrs(json!({"role": "a"})));
        assert_eq!(admins.len(), 2);
        assert!(admins[0].ptr_eq(&added[0]));

        added[0].set(attrs(json!({"id": 10})));
        assert!(users.get(10).unwrap().ptr_eq(&added[0]));
        assert!(users.get(1).is_none());
    }

    #[test]
    fn filter_combines_indexed_and_scanned_attributes() {
        let (_, users) = setup(&["role"]);
        users.add(list(json!([
            {"id": 1, "role": "a", "age": 3},
            {"id": 2, "role": "a", "age": 4},
            {"id": 3, "role": "b", "age": 3},
            {"id": 4, "age": 3}
        ])));

        let found = users.filter(attrs(json!({"age": 3, "role": "a"})));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), json!(1));

        assert_eq!(users.filter(attrs(json!({"age": 3}))).len(), 3);
        assert!(users.filter(attrs(json!({"role": null}))).is_empty());
        assert_eq!(users.filter(Attributes::new()).len(), 4);

        let old = users.filter(Query::predicate(|m| {
            m.attribute("age").and_then(|a| a.as_i64()).unwrap_or(0) > 3
        }));
        assert_eq!(old.len(), 1);

        assert_eq!(users.find(attrs(json!({"role": "b"}))).unwrap().id(), json!(3));
        assert!(matches!(
            users.must_find(attrs(json!({"role": "c"}))),
            Err(Error::NoMatch)
        ));
    }

    #[test]
    fn remove_by_model_and_id() {
        let (_, users) = setup(&[]);
        let added = users.add(list(json!([{"id": 1}, {"id": 2}, {"id": 3}])));
        let events = users.subscribe();

        let removed = users.remove([Target::from(&added[0]), Target::Id(json!(3))]);
        assert_eq!(removed.len(), 2);
        assert_eq!(users.ids(), vec![json!(2)]);
        assert!(added[0].collection().is_none());
        assert_eq!(
            events.try_recv().unwrap(),
            CollectionEvent::Removed {
                ids: vec![json!(1), json!(3)]
            }
        );

        assert!(users.remove([json!(99)]).is_empty());
        assert!(users.remove([&added[0]]).is_empty());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn set_reconciles_listing() {
        let (_, users) = setup(&[]);
        users.set(list(json!([{"id": 1, "n": "a"}, {"id": 2, "n": "b"}, {"n": "draft"}])), SetOptions::default());
        let first = users.get(1).unwrap();
        let draft = users.at(2).unwrap();

        users.set(list(json!([{"id": 1, "n": "A"}, {"id": 3, "n": "c"}])), SetOptions::default());

        assert!(users.get(1).unwrap().ptr_eq(&first));
        assert_eq!(first.get("n").unwrap(), json!("A"));
        assert!(users.get(2).is_none());
        assert!(users.get(3).is_some());
        assert!(users.models().iter().any(|m| m.ptr_eq(&draft)));
        assert_eq!(users.len(), 3);
    }

    #[test]
    fn set_respects_options() {
        let (_, users) = setup(&[]);
        users.set(list(json!([{"id": 1, "n": "a"}])), SetOptions::default());

        users.set(
            list(json!([{"id": 1, "n": "b"}, {"id": 2}])),
            SetOptions::new().add(false).change(false),
        );
        assert_eq!(users.ids(), vec![json!(1)]);
        assert_eq!(users.get(1).unwrap().get("n").unwrap(), json!("a"));

        users.set(list(json!([{"id": 2}])), SetOptions::new().remove(false));
        assert_eq!(users.ids(), vec![json!(1), json!(2)]);
    }

    #[test]
    fn set_twice_keeps_unsaved_resources_once() {
        let (_, users) = setup(&[]);
        let listing = json!([{"id": 1}, {"name": "draft"}]);
        users.set(list(listing.clone()), SetOptions::default());
        let draft = users.at(1).unwrap();

        users.set(list(listing.clone()), SetOptions::default());
        assert_eq!(users.len(), 2);
        assert!(users.at(1).unwrap().ptr_eq(&draft));
        assert_eq!(users.to_json(), listing);

        users.set(list(json!([{"id": 1}, {"name": "other"}])), SetOptions::default());
        assert_eq!(users.len(), 3);
    }

    #[test]
    fn ids_match_across_number_and_string_forms() {
        let (_, users) = setup(&[]);
        let added = users.add(list(json!([{"id": 1}, {"id": "abc"}])));

        assert!(users.get("1").unwrap().ptr_eq(&added[0]));
        assert!(users.get(json!(1.0)).unwrap().ptr_eq(&added[0]));
        assert!(users.get("abc").unwrap().ptr_eq(&added[1]));
        assert!(users.filter(attrs(json!({"id": "1"}))).is_empty());

        users.set(list(json!([{"id": "1", "n": "x"}, {"id": "abc"}])), SetOptions::default());
        assert_eq!(users.len(), 2);
        assert_eq!(added[0].get("n").unwrap(), json!("x"));

        assert_eq!(users.remove([json!("1")]).len(), 1);
        assert_eq!(users.ids(), vec![json!("abc")]);
    }

    #[test]
    fn set_collapses_duplicate_ids() {
        let (_, users) = setup(&[]);
        users.set(list(json!([{"id": 1, "n": "a"}, {"id": 1, "n": "b"}])), SetOptions::default());
        assert_eq!(users.len(), 1);
        assert_eq!(users.get(1).unwrap().get("n").unwrap(), json!("b"));
    }

    #[test]
    fn reset_detaches_dropped_models() {
        let (_, users) = setup(&[]);
        let added = users.add(list(json!([{"id": 1}, {"id": 2}])));
        users.reset([added[1].clone()]);
        assert_eq!(users.ids(), vec![json!(2)]);
        assert!(added[0].collection().is_none());
        assert!(added[1].collection().is_some());
    }

    #[test]
    fn model_url_falls_back_to_collection() {
        let (_, users) = setup(&[]);
        let model = users.build(attrs(json!({"id": 4})));
        assert_eq!(model.url().unwrap(), "/users/4");
        assert!(users.is_empty());
    }

    #[tokio::test]
    async fn create_is_tracked_by_collection_and_model() {
        let (adapter, users) = setup(&[]);
        let deferred = adapter.defer();

        let request = users
            .create(attrs(json!({"name": "ada"})), CreateOptions::default())
            .unwrap();
        assert_eq!(users.len(), 1);
        assert!(users.is_request("creating"));
        let model = users.at(0).unwrap();
        assert!(model.is_request("saving"));

        deferred.resolve(json!({"id": 9, "name": "ada"}));
        request.await.unwrap();

        assert!(users.get(9).unwrap().ptr_eq(&model));
        assert_eq!(users.at(0).unwrap().to_json(), json!({"name": "ada", "id": 9}));
        assert!(!model.is_request("saving"));
        assert!(!users.is_request("creating"));
        assert_eq!(adapter.last_call().unwrap().method, Method::Post);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn settled_create_leaves_no_collection_request() {
        let (adapter, users) = setup(&[]);
        for round in 0..16 {
            if round % 2 == 0 {
                adapter.respond(json!({"id": round + 1}));
            } else {
                adapter.fail("rejected");
            }
            let result = users
                .create(attrs(json!({"n": round})), CreateOptions::default())
                .unwrap()
                .await;

            assert!(!users.is_request("creating"));
            assert!(users.request().is_none());
            assert_eq!(users.error().is_some(), result.is_err());
        }
    }

    #[test]
    fn network_operations_need_a_runtime() {
        let (adapter, users) = setup(&[]);
        let model = users.add([attrs(json!({"id": 1, "n": "a"}))]).remove(0);

        assert!(matches!(
            users.create(attrs(json!({"n": "b"})), CreateOptions::default()),
            Err(Error::NoRuntime)
        ));
        assert!(matches!(
            model.save(Some(attrs(json!({"n": "z"}))), SaveOptions::default()),
            Err(Error::NoRuntime)
        ));
        assert!(matches!(
            model.destroy(DestroyOptions::default()),
            Err(Error::NoRuntime)
        ));
        assert!(matches!(users.fetch(FetchOptions::default()), Err(Error::NoRuntime)));
        assert!(matches!(users.rpc("count", RpcOptions::default()), Err(Error::NoRuntime)));

        assert_eq!(users.to_json(), json!([{"id": 1, "n": "a"}]));
        assert!(model.collection().unwrap().ptr_eq(&users));
        assert!(users.requests().active().is_empty());
        assert!(model.requests().active().is_empty());
        assert!(adapter.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_create_removes_model() {
        let (adapter, users) = setup(&[]);
        adapter.fail("boom");

        let request = users
            .create(attrs(json!({"name": "ada"})), CreateOptions::default())
            .unwrap();
        assert_eq!(users.len(), 1);
        assert!(request.await.is_err());
        assert!(users.is_empty());
    }

    #[tokio::test]
    async fn pessimistic_create_inserts_on_success() {
        let (adapter, users) = setup(&[]);
        let deferred = adapter.defer();

        let request = users
            .create(attrs(json!({"name": "ada"})), CreateOptions::new().optimistic(false))
            .unwrap();
        assert!(users.is_empty());

        deferred.resolve(json!({"id": 1}));
        request.await.unwrap();
        assert_eq!(users.ids(), vec![json!(1)]);
    }

    #[tokio::test]
    async fn saving_new_member_goes_through_collection() {
        let (adapter, users) = setup(&[]);
        adapter.respond(json!({"id": 5}));
        let model = users.build(attrs(json!({"name": "x"})));

        let request = model.save(None, SaveOptions::default()).unwrap();
        assert!(users.is_request("creating"));
        assert_eq!(users.len(), 1);
        request.await.unwrap();
        assert!(users.get(5).is_some());
    }

    #[tokio::test]
    async fn destroy_rolls_back_on_failure() {
        let (adapter, users) = setup(&[]);
        let added = users.add(list(json!([{"id": 1}, {"id": 2}])));
        adapter.fail("nope");

        let request = added[0].destroy(DestroyOptions::default()).unwrap();
        assert_eq!(users.ids(), vec![json!(2)]);
        assert_eq!(adapter.last_call().unwrap().path, "/users/1");

        assert!(request.await.is_err());
        assert_eq!(users.len(), 2);
        assert!(users.get(1).unwrap().ptr_eq(&added[0]));
    }

    #[tokio::test]
    async fn pessimistic_destroy_waits_for_server() {
        let (adapter, users) = setup(&[]);
        let added = users.add(list(json!([{"id": 1}])));
        let deferred = adapter.defer();

        let request = added[0]
            .destroy(DestroyOptions::new().optimistic(false))
            .unwrap();
        assert_eq!(users.len(), 1);

        deferred.resolve(Value::Null);
        request.await.unwrap();
        assert!(users.is_empty());
    }

    #[tokio::test]
    async fn destroy_new_member_only_removes_locally() {
        let (adapter, users) = setup(&[]);
        let model = users.add([attrs(json!({"name": "draft"}))]).remove(0);
        model.destroy(DestroyOptions::default()).unwrap().await.unwrap();
        assert!(users.is_empty());
        assert!(adapter.calls().is_empty());
    }

    #[tokio::test]
    async fn fetch_sets_listing() {
        let (adapter, users) = setup(&[]);
        users.add(list(json!([{"id": 1, "n": "old"}, {"id": 7}])));
        adapter.respond(json!([{"id": 1, "n": "new"}, {"id": 2}, 5]));

        let request = users
            .fetch(FetchOptions::new().data(json!({"page": 1})))
            .unwrap();
        assert!(users.is_request("fetching"));
        request.await.unwrap();

        assert_eq!(users.ids(), vec![json!(1), json!(2)]);
        assert_eq!(users.get(1).unwrap().get("n").unwrap(), json!("new"));
        assert_eq!(adapter.last_call().unwrap().data, Some(json!({"page": 1})));
    }

    #[tokio::test]
    async fn rpc_on_collection() {
        let (adapter, users) = setup(&[]);
        adapter.respond(json!({"count": 3}));
        let response = users
            .rpc("count", RpcOptions::default())
            .unwrap()
            .await
            .unwrap();
        assert_eq!(response, json!({"count": 3}));
        assert_eq!(adapter.last_call().unwrap().path, "/users/count");
    }
}
