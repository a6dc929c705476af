//! In-flight request records and the per-owner request registry.
//!
//! A [`Request`] is handed back to the caller as soon as an operation starts.
//! It can be inspected (labels, progress, state), aborted, and awaited.
//! Every model and collection owns a [`RequestTracker`] listing the
//! requests that are still pending.

use crate::adapter::{AbortHandle, AdapterCall, ProgressFn};
use crate::error::{Error, ErrorObject, Result};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use tokio::sync::watch;

/// Settlement state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    /// Waiting for the adapter.
    Pending,
    /// The adapter resolved.
    Fulfilled,
    /// The adapter rejected, or reconciliation failed.
    Rejected,
}

impl RequestState {
    /// Returns true while the request has not settled.
    pub fn is_pending(&self) -> bool {
        matches!(self, RequestState::Pending)
    }
}

type Outcome = Option<Result<Value>>;

struct RequestInner {
    labels: Vec<String>,
    abort: Mutex<Option<AbortHandle>>,
    progress: Mutex<Option<f64>>,
    state: Mutex<RequestState>,
    outcome: watch::Receiver<Outcome>,
}

/// One asynchronous operation against the adapter.
///
/// Clones share the same record. Awaiting a request (or any clone of it)
/// yields the response once the owner has reconciled its state.
#[derive(Clone)]
pub struct Request {
    inner: Arc<RequestInner>,
}

/// Write side of a pending request, held by the task that settles it.
pub(crate) struct Settle {
    request: Request,
    sender: watch::Sender<Outcome>,
}

impl Settle {
    pub(crate) fn settle(self, outcome: Result<Value>) {
        *self.request.inner.state.lock() = if outcome.is_ok() {
            RequestState::Fulfilled
        } else {
            RequestState::Rejected
        };
        self.sender.send_replace(Some(outcome));
    }
}

impl Request {
    /// Creates a pending request and the handle that settles it.
    pub(crate) fn pending<I, S>(labels: I) -> (Request, Settle)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (sender, outcome) = watch::channel(None);
        let request = Request::from_parts(labels, RequestState::Pending, outcome, Some(0.0));
        let settle = Settle {
            request: request.clone(),
            sender,
        };
        (request, settle)
    }

    /// Creates a request that has already been fulfilled with `value`.
    pub fn resolved<I, S>(labels: I, value: Value) -> Request
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (_, outcome) = watch::channel(Some(Ok(value)));
        Request::from_parts(labels, RequestState::Fulfilled, outcome, None)
    }

    fn from_parts<I, S>(
        labels: I,
        state: RequestState,
        outcome: watch::Receiver<Outcome>,
        progress: Option<f64>,
    ) -> Request
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Request {
            inner: Arc::new(RequestInner {
                labels: labels.into_iter().map(Into::into).collect(),
                abort: Mutex::new(None),
                progress: Mutex::new(progress),
                state: Mutex::new(state),
                outcome,
            }),
        }
    }

    /// Labels describing the operation (`fetching`, `saving`, ...).
    pub fn labels(&self) -> &[String] {
        &self.inner.labels
    }

    /// Returns whether the request carries `label`.
    pub fn has_label(&self, label: &str) -> bool {
        self.inner.labels.iter().any(|l| l == label)
    }

    /// Current settlement state.
    pub fn state(&self) -> RequestState {
        *self.inner.state.lock()
    }

    /// Last progress value reported by the adapter.
    pub fn progress(&self) -> Option<f64> {
        *self.inner.progress.lock()
    }

    /// Records a progress value.
    pub fn set_progress(&self, progress: Option<f64>) {
        *self.inner.progress.lock() = progress;
    }

    /// Asks the adapter to cancel the request.
    ///
    /// Cancellation is advisory: the request may still settle either way.
    pub fn abort(&self) {
        let abort = self.inner.abort.lock().clone();
        if let Some(abort) = abort {
            abort();
        }
    }

    /// Returns whether both handles refer to the same request.
    pub fn ptr_eq(&self, other: &Request) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Callback the adapter uses to report progress into this request.
    pub(crate) fn progress_reporter(&self) -> ProgressFn {
        let weak: Weak<RequestInner> = Arc::downgrade(&self.inner);
        Arc::new(move |progress| {
            if let Some(inner) = weak.upgrade() {
                *inner.progress.lock() = Some(progress);
            }
        })
    }

    fn attach_abort(&self, abort: Option<AbortHandle>) {
        *self.inner.abort.lock() = abort;
    }

    /// Waits for the request to settle.
    pub async fn wait(&self) -> Result<Value> {
        let mut outcome = self.inner.outcome.clone();
        let settled = match outcome.wait_for(Option::is_some).await {
            Ok(settled) => (*settled).clone(),
            Err(_) => None,
        };
        settled.unwrap_or(Err(Error::Dropped))
    }
}

impl IntoFuture for Request {
    type Output = Result<Value>;
    type IntoFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("labels", &self.inner.labels)
            .field("state", &self.state())
            .field("progress", &self.progress())
            .finish()
    }
}

#[derive(Default)]
struct TrackerInner {
    active: RwLock<Vec<Request>>,
    latest: RwLock<Option<Request>>,
    last_error: RwLock<Option<Error>>,
}

/// Registry of the requests an owner currently has in flight.
///
/// Requests are added when they start and removed exactly once when they
/// settle, on either path.
#[derive(Clone, Default)]
pub struct RequestTracker {
    inner: Arc<TrackerInner>,
}

impl RequestTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// First active request carrying `label`.
    pub fn get_request(&self, label: &str) -> Option<Request> {
        self.inner
            .active
            .read()
            .iter()
            .find(|request| request.has_label(label))
            .cloned()
    }

    /// All active requests carrying `label`.
    pub fn get_all_requests(&self, label: &str) -> Vec<Request> {
        self.inner
            .active
            .read()
            .iter()
            .filter(|request| request.has_label(label))
            .cloned()
            .collect()
    }

    /// Returns whether a request carrying `label` is active.
    pub fn is_request(&self, label: &str) -> bool {
        self.get_request(label).is_some()
    }

    /// All active requests, oldest first.
    pub fn active(&self) -> Vec<Request> {
        self.inner.active.read().clone()
    }

    /// Most recently started request, while it is still pending.
    pub fn latest(&self) -> Option<Request> {
        self.inner.latest.read().clone()
    }

    /// Error of the last request that settled, cleared by a later success.
    pub fn last_error(&self) -> Option<Error> {
        self.inner.last_error.read().clone()
    }

    fn register(&self, request: &Request) {
        tracing::debug!(labels = ?request.labels(), "request started");
        self.inner.active.write().push(request.clone());
        *self.inner.latest.write() = Some(request.clone());
    }

    fn deregister(&self, request: &Request, outcome: &Result<Value>) {
        self.inner
            .active
            .write()
            .retain(|active| !active.ptr_eq(request));
        {
            let mut latest = self.inner.latest.write();
            if latest.as_ref().is_some_and(|l| l.ptr_eq(request)) {
                *latest = None;
            }
        }
        *self.inner.last_error.write() = outcome.as_ref().err().cloned();
        tracing::debug!(
            labels = ?request.labels(),
            ok = outcome.is_ok(),
            "request settled"
        );
    }

    /// Registers `request` and drives `call` to completion on the runtime.
    ///
    /// `finish` runs once the adapter settles and before any waiter is
    /// woken, so awaiting the request observes the reconciled state.
    /// Adapter failures are normalized into [`ErrorObject`] carrying
    /// `payload` before `finish` sees them.
    ///
    /// Callers check [`ensure_runtime`] before mutating anything.
    pub(crate) fn spawn<F>(
        &self,
        request: Request,
        settle: Settle,
        call: AdapterCall,
        payload: Option<Value>,
        finish: F,
    ) -> Request
    where
        F: FnOnce(Result<Value>) -> Result<Value> + Send + 'static,
    {
        self.spawn_shared(None, request, settle, call, payload, finish)
    }

    /// Like [`spawn`](Self::spawn), also listing the request in `shared`.
    ///
    /// Every owner deregisters before the request settles.
    pub(crate) fn spawn_shared<F>(
        &self,
        shared: Option<RequestTracker>,
        request: Request,
        settle: Settle,
        call: AdapterCall,
        payload: Option<Value>,
        finish: F,
    ) -> Request
    where
        F: FnOnce(Result<Value>) -> Result<Value> + Send + 'static,
    {
        let AdapterCall { response, abort } = call;
        request.attach_abort(abort);
        let owners: Vec<RequestTracker> = std::iter::once(self.clone()).chain(shared).collect();
        for owner in &owners {
            owner.register(&request);
        }

        let handle = request.clone();
        tokio::spawn(async move {
            let outcome = response
                .await
                .map_err(|e| Error::Request(ErrorObject::from(e).with_payload(payload)));
            let outcome = finish(outcome);
            for owner in &owners {
                owner.deregister(&handle, &outcome);
            }
            settle.settle(outcome);
        });

        request
    }
}

/// Fails with [`Error::NoRuntime`] unless called inside a Tokio runtime.
pub(crate) fn ensure_runtime() -> Result<()> {
    tokio::runtime::Handle::try_current()
        .map(|_| ())
        .map_err(|_| Error::NoRuntime)
}

impl fmt::Debug for RequestTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestTracker")
            .field("active", &self.inner.active.read().len())
            .finish()
    }
}
