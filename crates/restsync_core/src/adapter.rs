//! Transport abstraction used by models and collections.
//!
//! An [`Adapter`] implements the five REST verbs. Each call returns an
//! [`AdapterCall`]: the future of the decoded response body plus an optional
//! abort handle. How the request actually travels (HTTP client, sockets,
//! in-process fake) is up to the implementation.

use crate::error::AdapterError;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Boxed future returned by adapters.
pub type ResponseFuture = Pin<Box<dyn Future<Output = Result<Value, AdapterError>> + Send>>;

/// Callback cancelling an in-flight call.
pub type AbortHandle = Arc<dyn Fn() + Send + Sync>;

/// Callback receiving upload/download progress.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// An in-flight adapter call.
pub struct AdapterCall {
    /// Resolves with the decoded body, or rejects with an adapter error.
    pub response: ResponseFuture,
    /// Optional cancellation hook.
    pub abort: Option<AbortHandle>,
}

impl AdapterCall {
    /// Wraps a response future.
    pub fn new<F>(response: F) -> Self
    where
        F: Future<Output = Result<Value, AdapterError>> + Send + 'static,
    {
        Self {
            response: Box::pin(response),
            abort: None,
        }
    }

    /// A call that has already completed.
    pub fn ready(result: Result<Value, AdapterError>) -> Self {
        Self::new(std::future::ready(result))
    }

    /// Attaches an abort handle.
    #[must_use]
    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = Some(abort);
        self
    }
}

impl fmt::Debug for AdapterCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterCall")
            .field("abortable", &self.abort.is_some())
            .finish()
    }
}

/// Per-call options passed to the adapter.
#[derive(Clone, Default)]
pub struct CallOptions {
    /// Progress callback wired to the request record.
    pub on_progress: Option<ProgressFn>,
}

impl CallOptions {
    /// Sets the progress callback.
    #[must_use]
    pub fn with_progress(mut self, on_progress: ProgressFn) -> Self {
        self.on_progress = Some(on_progress);
        self
    }
}

impl fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOptions")
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// HTTP verb of an adapter call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
}

/// Transport for REST resources.
///
/// Implementations resolve with the decoded body on success and reject with
/// an [`AdapterError`] on non-2xx responses or transport failures.
pub trait Adapter: Send + Sync {
    /// Issues a `GET`.
    fn get(&self, path: &str, data: Option<Value>, options: CallOptions) -> AdapterCall;

    /// Issues a `POST`.
    fn post(&self, path: &str, data: Option<Value>, options: CallOptions) -> AdapterCall;

    /// Issues a `PUT`.
    fn put(&self, path: &str, data: Option<Value>, options: CallOptions) -> AdapterCall;

    /// Issues a `PATCH`.
    fn patch(&self, path: &str, data: Option<Value>, options: CallOptions) -> AdapterCall;

    /// Issues a `DELETE`.
    fn del(&self, path: &str, data: Option<Value>, options: CallOptions) -> AdapterCall;

    /// Dispatches on `method`.
    fn call(
        &self,
        method: Method,
        path: &str,
        data: Option<Value>,
        options: CallOptions,
    ) -> AdapterCall {
        match method {
            Method::Get => self.get(path, data, options),
            Method::Post => self.post(path, data, options),
            Method::Put => self.put(path, data, options),
            Method::Patch => self.patch(path, data, options),
            Method::Delete => self.del(path, data, options),
        }
    }
}

/// A call received by [`MockAdapter`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Verb used.
    pub method: Method,
    /// Path requested.
    pub path: String,
    /// Body sent.
    pub data: Option<Value>,
}

enum Reply {
    Ready(Result<Value, AdapterError>),
    Deferred(oneshot::Receiver<Result<Value, AdapterError>>),
}

/// Handle settling a reply queued with [`MockAdapter::defer`].
#[derive(Debug)]
pub struct Deferred {
    sender: oneshot::Sender<Result<Value, AdapterError>>,
}

impl Deferred {
    /// Resolves the pending call with `value`.
    pub fn resolve(self, value: Value) {
        let _ = self.sender.send(Ok(value));
    }

    /// Rejects the pending call with `error`.
    pub fn reject(self, error: impl Into<AdapterError>) {
        let _ = self.sender.send(Err(error.into()));
    }
}

/// A scripted adapter for testing.
///
/// Every call is recorded and answered with the next queued reply, in FIFO
/// order. Calls arriving with an empty queue are rejected.
#[derive(Default)]
pub struct MockAdapter {
    calls: Mutex<Vec<RecordedCall>>,
    replies: Mutex<VecDeque<Reply>>,
    aborted: Arc<AtomicUsize>,
}

impl MockAdapter {
    /// Creates a mock adapter with no queued replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful reply.
    pub fn respond(&self, value: Value) {
        self.replies.lock().push_back(Reply::Ready(Ok(value)));
    }

    /// Queues a failure.
    pub fn fail(&self, error: impl Into<AdapterError>) {
        self.replies.lock().push_back(Reply::Ready(Err(error.into())));
    }

    /// Queues a reply settled later through the returned handle.
    pub fn defer(&self) -> Deferred {
        let (sender, receiver) = oneshot::channel();
        self.replies.lock().push_back(Reply::Deferred(receiver));
        Deferred { sender }
    }

    /// All calls received so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// The most recent call.
    pub fn last_call(&self) -> Option<RecordedCall> {
        self.calls.lock().last().cloned()
    }

    /// Number of times an abort handle was invoked.
    pub fn aborted(&self) -> usize {
        self.aborted.load(Ordering::SeqCst)
    }

    fn record(&self, method: Method, path: &str, data: Option<Value>) -> AdapterCall {
        self.calls.lock().push(RecordedCall {
            method,
            path: path.to_string(),
            data,
        });

        let aborted = Arc::clone(&self.aborted);
        let abort: AbortHandle = Arc::new(move || {
            aborted.fetch_add(1, Ordering::SeqCst);
        });

        let call = match self.replies.lock().pop_front() {
            Some(Reply::Ready(result)) => AdapterCall::ready(result),
            Some(Reply::Deferred(receiver)) => AdapterCall::new(async move {
                receiver
                    .await
                    .unwrap_or_else(|_| Err(AdapterError::message("deferred reply dropped")))
            }),
            None => AdapterCall::ready(Err(AdapterError::message(format!(
                "no mock reply queued for {:?} {}",
                method, path
            )))),
        };
        call.with_abort(abort)
    }
}

impl Adapter for MockAdapter {
    fn get(&self, path: &str, data: Option<Value>, _options: CallOptions) -> AdapterCall {
        self.record(Method::Get, path, data)
    }

    fn post(&self, path: &str, data: Option<Value>, _options: CallOptions) -> AdapterCall {
        self.record(Method::Post, path, data)
    }

    fn put(&self, path: &str, data: Option<Value>, _options: CallOptions) -> AdapterCall {
        self.record(Method::Put, path, data)
    }

    fn patch(&self, path: &str, data: Option<Value>, _options: CallOptions) -> AdapterCall {
        self.record(Method::Patch, path, data)
    }

    fn del(&self, path: &str, data: Option<Value>, _options: CallOptions) -> AdapterCall {
        self.record(Method::Delete, path, data)
    }
}

impl fmt::Debug for MockAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockAdapter")
            .field("calls", &self.calls.lock().len())
            .field("queued", &self.replies.lock().len())
            .finish()
    }
}
