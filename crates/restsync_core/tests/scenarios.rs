//! End-to-end scenarios against an in-memory REST server.

use parking_lot::Mutex;
use restsync_core::{
    from_value, Adapter, AdapterCall, AdapterError, Attributes, CallOptions, Client, Collection,
    CollectionEvent, CollectionSpec, CreateOptions, DestroyOptions, FetchOptions, FieldMapper,
    FieldMapping, Model, MockAdapter, RequestState, SaveOptions, Schema,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn attrs(value: Value) -> Attributes {
    from_value(value).unwrap()
}

/// A REST server holding one resource table in memory.
#[derive(Default)]
struct MemoryServer {
    rows: Mutex<BTreeMap<u64, Attributes>>,
    next_id: Mutex<u64>,
}

impl MemoryServer {
    fn id_of(path: &str) -> Option<u64> {
        path.rsplit('/').next().and_then(|s| s.parse().ok())
    }

    fn not_found(path: &str) -> AdapterCall {
        AdapterCall::ready(Err(AdapterError::response(
            json!({"message": format!("{path} not found")}),
            Some(json!({"status": 404})),
        )))
    }

    fn update(&self, path: &str, data: Option<Value>, replace: bool) -> AdapterCall {
        let Some(id) = Self::id_of(path) else {
            return Self::not_found(path);
        };
        let mut rows = self.rows.lock();
        let Some(row) = rows.get_mut(&id) else {
            return Self::not_found(path);
        };
        let body = data.and_then(|d| from_value(d).ok()).unwrap_or_default();
        if replace {
            *row = body;
            row.insert("id".into(), json!(id));
        } else {
            row.extend(body);
        }
        AdapterCall::ready(Ok(Value::Object(row.clone())))
    }
}

impl Adapter for MemoryServer {
    fn get(&self, path: &str, _data: Option<Value>, _options: CallOptions) -> AdapterCall {
        let rows = self.rows.lock();
        match Self::id_of(path) {
            Some(id) => match rows.get(&id) {
                Some(row) => AdapterCall::ready(Ok(Value::Object(row.clone()))),
                None => Self::not_found(path),
            },
            None => AdapterCall::ready(Ok(Value::Array(
                rows.values().cloned().map(Value::Object).collect(),
            ))),
        }
    }

    fn post(&self, _path: &str, data: Option<Value>, options: CallOptions) -> AdapterCall {
        let mut row = data.and_then(|d| from_value(d).ok()).unwrap_or_default();
        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            *next
        };
        row.insert("id".into(), json!(id));
        self.rows.lock().insert(id, row.clone());
        if let Some(on_progress) = options.on_progress {
            on_progress(1.0);
        }
        AdapterCall::ready(Ok(Value::Object(row)))
    }

    fn put(&self, path: &str, data: Option<Value>, _options: CallOptions) -> AdapterCall {
        self.update(path, data, true)
    }

    fn patch(&self, path: &str, data: Option<Value>, _options: CallOptions) -> AdapterCall {
        self.update(path, data, false)
    }

    fn del(&self, path: &str, _data: Option<Value>, _options: CallOptions) -> AdapterCall {
        match Self::id_of(path).and_then(|id| self.rows.lock().remove(&id)) {
            Some(_) => AdapterCall::ready(Ok(Value::Null)),
            None => Self::not_found(path),
        }
    }
}

struct Users;

impl CollectionSpec for Users {
    fn url(&self) -> String {
        "/users".into()
    }

    fn model(&self, _attributes: &Attributes) -> Arc<Schema> {
        Arc::new(Schema::new().with_defaults(attrs(json!({"active": true}))))
    }

    fn indexes(&self) -> Vec<String> {
        vec!["team".into()]
    }
}

#[tokio::test]
async fn crud_round_trip_against_memory_server() {
    init_tracing();
    let server = Arc::new(MemoryServer::default());
    let client = Client::new(server.clone());
    let users = Collection::new(&client, Users);

    let request = users
        .create(attrs(json!({"name": "ada", "team": "core"})), CreateOptions::default())
        .unwrap();
    assert_eq!(users.len(), 1);
    request.await.unwrap();

    let ada = users.get(1).unwrap();
    assert_eq!(ada.get("active").unwrap(), json!(true));
    assert!(!ada.has_changes(None));

    ada.set(attrs(json!({"team": "infra"})));
    ada.save(None, SaveOptions::default()).unwrap().await.unwrap();
    assert_eq!(server.rows.lock()[&1].get("team"), Some(&json!("infra")));
    assert_eq!(users.filter(attrs(json!({"team": "infra"}))).len(), 1);

    ada.destroy(DestroyOptions::default()).unwrap().await.unwrap();
    assert!(users.is_empty());
    assert!(server.rows.lock().is_empty());
}

#[tokio::test]
async fn second_client_sees_first_clients_writes() {
    let server = Arc::new(MemoryServer::default());
    let writer = Collection::new(&Client::new(server.clone()), Users);
    let reader = Collection::new(&Client::new(server.clone()), Users);

    for name in ["a", "b", "c"] {
        writer
            .create(attrs(json!({"name": name})), CreateOptions::default())
            .unwrap()
            .await
            .unwrap();
    }
    reader.fetch(FetchOptions::default()).unwrap().await.unwrap();
    assert_eq!(reader.ids(), vec![json!(1), json!(2), json!(3)]);

    writer.get(2).unwrap().destroy(DestroyOptions::default()).unwrap().await.unwrap();
    let kept = reader.get(1).unwrap();
    reader.fetch(FetchOptions::default()).unwrap().await.unwrap();
    assert_eq!(reader.ids(), vec![json!(1), json!(3)]);
    assert!(reader.get(1).unwrap().ptr_eq(&kept));
}

#[tokio::test]
async fn destroying_missing_resource_restores_it() {
    let server = Arc::new(MemoryServer::default());
    let users = Collection::new(&Client::new(server), Users);
    users.add([attrs(json!({"id": 42, "name": "ghost"}))]);
    let events = users.subscribe();

    let ghost = users.get(42).unwrap();
    let err = ghost
        .destroy(DestroyOptions::default())
        .unwrap()
        .await
        .unwrap_err();

    let object = err.as_request().unwrap();
    assert_eq!(object.request_response, Some(json!({"status": 404})));
    assert!(users.get(42).unwrap().ptr_eq(&ghost));
    assert!(matches!(events.try_recv().unwrap(), CollectionEvent::Removed { .. }));
    assert!(matches!(events.try_recv().unwrap(), CollectionEvent::Added { .. }));
}

#[tokio::test]
async fn create_with_server_assigned_id() {
    let adapter = Arc::new(MockAdapter::new());
    let users = Collection::new(&Client::new(adapter.clone()), Users);
    let deferred = adapter.defer();

    let request = users
        .create(attrs(json!({"phone": "1234"})), CreateOptions::default())
        .unwrap();
    let model = users.at(0).unwrap();
    assert!(model.is_new());
    assert_eq!(request.state(), RequestState::Pending);

    deferred.resolve(json!({"id": 1, "phone": "1234"}));
    request.await.unwrap();

    assert!(!model.is_new());
    assert_eq!(model.url().unwrap(), "/users/1");
    assert!(users.get(1).unwrap().ptr_eq(&model));
    assert!(users.get(model.optimistic_id().to_string()).unwrap().ptr_eq(&model));
}

#[tokio::test]
async fn destroy_conflict_rolls_back() {
    let adapter = Arc::new(MockAdapter::new());
    let users = Collection::new(&Client::new(adapter.clone()), Users);
    let model = users.add([attrs(json!({"id": 1, "name": "ada"}))]).remove(0);
    let before = model.to_json();
    adapter.fail("Conflict");

    let request = model.destroy(DestroyOptions::default()).unwrap();
    assert_eq!(users.len(), 0);
    assert!(model.collection().is_none());

    let err = request.await.unwrap_err();
    assert_eq!(err.as_request().unwrap().error.as_message(), Some("Conflict"));
    assert_eq!(users.len(), 1);
    assert_eq!(model.to_json(), before);
    assert!(model.collection().unwrap().ptr_eq(&users));
}

#[tokio::test]
async fn concurrent_saves_are_tracked_separately() {
    let adapter = Arc::new(MockAdapter::new());
    let client = Client::new(adapter.clone());
    let model = Model::new(&client, Schema::new().with_url_root("/notes"), attrs(json!({"id": 1})));
    let first = adapter.defer();
    let second = adapter.defer();

    let a = model.save(Some(attrs(json!({"title": "a"}))), SaveOptions::default()).unwrap();
    let b = model.save(Some(attrs(json!({"body": "b"}))), SaveOptions::default()).unwrap();
    assert_eq!(model.get_all_requests("saving").len(), 2);
    assert!(model.request().unwrap().ptr_eq(&b));

    second.resolve(json!({"id": 1, "title": "a", "body": "b"}));
    b.await.unwrap();
    assert_eq!(model.get_all_requests("saving").len(), 1);
    assert!(model.request().is_none());

    first.reject("timeout");
    assert!(a.await.is_err());
    assert!(!model.is_request("saving"));
    assert!(model.error().is_some());
}

#[tokio::test]
async fn abort_reaches_adapter() {
    let adapter = Arc::new(MockAdapter::new());
    let client = Client::new(adapter.clone());
    let model = Model::new(&client, Schema::new().with_url_root("/notes"), attrs(json!({"id": 1})));
    let pending = adapter.defer();

    let request = model.fetch(FetchOptions::default()).unwrap();
    request.abort();
    assert_eq!(adapter.aborted(), 1);
    assert_eq!(request.state(), RequestState::Pending);
    assert!(model.is_request("fetching"));

    // The adapter decides how a cancelled call settles.
    pending.reject("aborted");
    let err = request.await.unwrap_err();
    assert_eq!(err.as_request().unwrap().error.as_message(), Some("aborted"));
    assert!(!model.is_request("fetching"));
}

#[tokio::test]
async fn mapped_collection_round_trip() {
    struct Mapped;

    impl CollectionSpec for Mapped {
        fn url(&self) -> String {
            "/people".into()
        }

        fn model(&self, _attributes: &Attributes) -> Arc<Schema> {
            Arc::new(Schema::new().with_field_map(vec![
                FieldMapping::new("id", "id"),
                FieldMapping::new("fullName", "full_name"),
            ]))
        }
    }

    let server = Arc::new(MemoryServer::default());
    let client = Client::new(server.clone()).with_mapper(Arc::new(FieldMapper));
    let people = Collection::new(&client, Mapped);

    people
        .create(attrs(json!({"fullName": "Ada Lovelace"})), CreateOptions::default())
        .unwrap()
        .await
        .unwrap();
    assert_eq!(
        server.rows.lock()[&1],
        attrs(json!({"full_name": "Ada Lovelace", "id": 1}))
    );

    let fresh = Collection::new(&client, Mapped);
    fresh.fetch(FetchOptions::default()).unwrap().await.unwrap();
    assert_eq!(fresh.get(1).unwrap().get("fullName").unwrap(), json!("Ada Lovelace"));
}
