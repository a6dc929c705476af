//! # Restsync Core
//!
//! Client-side models and collections for REST resources.
//!
//! This crate provides:
//! - Attribute stores with committed/working snapshots and deep change diffs
//! - Models with optimistic save, fetch, destroy and RPC
//! - Collections with reconciliation, lazy equality indexes and queries
//! - Request tracking with labels, progress and abort
//! - Pluggable transport ([`Adapter`]) and payload translation ([`ModelMapper`])
//!
//! ## Architecture
//!
//! Every network operation follows an **apply-then-reconcile** model:
//! 1. Apply the optimistic mutation locally
//! 2. Issue the request through the adapter and track it
//! 3. Merge the server response, or roll back on failure
//!
//! Operations return a [`Request`] immediately. Awaiting it yields the
//! response once local state has been reconciled.
//!
//! ## Key Invariants
//!
//! - A model belongs to at most one collection
//! - A collection never holds the same model twice
//! - Index lookups agree with a linear scan
//! - Failed optimistic operations leave no trace
//!
//! ## Example
//!
//! ```rust,ignore
//! let client = Client::new(Arc::new(MockAdapter::new()));
//! let users = Collection::new(&client, Users);
//!
//! let request = users.create(attributes, CreateOptions::default())?;
//! assert_eq!(users.len(), 1);
//! request.await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod attributes;
mod client;
mod collection;
mod error;
mod events;
mod index;
mod mapper;
mod model;
mod options;
mod request;
mod schema;

pub use adapter::{
    AbortHandle, Adapter, AdapterCall, CallOptions, Deferred, Method, MockAdapter, ProgressFn,
    RecordedCall, ResponseFuture,
};
pub use attributes::{
    apply_patch, changed_attributes_between, changes_between, from_value, is_truthy,
    AttributeStore, Attributes,
};
pub use client::Client;
pub use collection::{Collection, CollectionSpec, Query, Resource, Target};
pub use error::{AdapterError, Error, ErrorCause, ErrorObject, Result};
pub use events::{CollectionEvent, ModelEvent};
pub use index::{Index, IndexKey};
pub use mapper::{FieldMapper, FieldMapping, ModelMapper};
pub use model::{Model, OptimisticId};
pub use options::{
    CreateOptions, DestroyOptions, Endpoint, FetchOptions, RpcOptions, SaveOptions, SetOptions,
    RPC_LABEL,
};
pub use request::{Request, RequestState, RequestTracker};
pub use schema::{Schema, DEFAULT_PRIMARY_KEY};
