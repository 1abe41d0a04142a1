//! Shared test doubles for the attribution client.
//!
//! Feature-gated behind `testutil` to keep these out of production builds.
//!
//! ```toml
//! [dev-dependencies]
//! attribution-client = { path = "../client", features = ["testutil"] }
//! ```

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::{
    sync::{Notify, Semaphore},
    time::Instant,
};

use crate::{
    capability::{CapabilityTier, CoarseValue, PostbackUpdater, UpdaterError},
    error::{ClientError, ClientResult, TransportErrorKind},
    http::{HttpExchange, HttpRequest, HttpResponse},
};

/// Body returned once the script runs out.
pub const DEFAULT_RESPONSE_BODY: &str = r#"{"data":{}}"#;

/// An [`HttpExchange`] that replays a queue of scripted outcomes.
///
/// Each call pops the next outcome; an empty queue answers
/// `200 {"data":{}}`. Every request is captured together with the
/// `tokio::time::Instant` it arrived at, so paused-clock tests can measure
/// backoff exactly.
#[derive(Clone, Default)]
pub struct ScriptedExchange {
    script: Arc<Mutex<VecDeque<ClientResult<HttpResponse>>>>,
    requests: Arc<Mutex<Vec<(Instant, HttpRequest)>>>,
}

impl ScriptedExchange {
    /// Creates an exchange with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response with `status` and `body`.
    pub fn push_status(&self, status: u16, body: impl Into<bytes::Bytes>) {
        self.script.lock().push_back(Ok(HttpResponse::new(status, body)));
    }

    /// Queues a `200` response carrying `json`.
    pub fn push_json(&self, json: &serde_json::Value) {
        self.push_status(200, json.to_string());
    }

    /// Queues a transport failure of `kind`.
    pub fn push_transport_error(&self, kind: TransportErrorKind) {
        self.script.lock().push_back(Err(ClientError::transport(kind, "scripted failure")));
    }

    /// Number of exchanges performed.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Captured requests, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().iter().map(|(_, request)| request.clone()).collect()
    }

    /// Arrival instants of captured requests, in order.
    #[must_use]
    pub fn arrival_times(&self) -> Vec<Instant> {
        self.requests.lock().iter().map(|(at, _)| *at).collect()
    }
}

#[async_trait]
impl HttpExchange for ScriptedExchange {
    async fn exchange(&self, request: HttpRequest) -> ClientResult<HttpResponse> {
        self.requests.lock().push((Instant::now(), request));
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(HttpResponse::new(200, DEFAULT_RESPONSE_BODY)))
    }
}

/// One call observed by [`RecordingUpdater`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCall {
    /// Tier method that was invoked.
    pub tier: CapabilityTier,
    /// Fine value passed.
    pub fine_value: u32,
    /// Coarse value passed (always `None` for the fine-only tier).
    pub coarse_value: Option<CoarseValue>,
    /// Lock window passed (always `false` for the fine-only tier).
    pub lock_window: bool,
}

/// A [`PostbackUpdater`] supporting every tier that records its calls.
///
/// Updates can be made to fail, and async-tier calls can be held at a gate
/// so tests can observe an update while it is in flight.
#[derive(Clone)]
pub struct RecordingUpdater {
    calls: Arc<Mutex<Vec<UpdateCall>>>,
    fail: Arc<AtomicBool>,
    gated: Arc<AtomicBool>,
    entered: Arc<Notify>,
    release: Arc<Semaphore>,
}

impl Default for RecordingUpdater {
    fn default() -> Self {
        Self {
            calls: Arc::default(),
            fail: Arc::default(),
            gated: Arc::default(),
            entered: Arc::default(),
            release: Arc::new(Semaphore::new(0)),
        }
    }
}

impl RecordingUpdater {
    /// Creates an updater that accepts every call.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent calls fail (or succeed again).
    pub fn fail_updates(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Holds subsequent async-tier calls until [`release_one`](Self::release_one).
    pub fn close_gate(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    /// Stops holding subsequent calls. Calls already held still need
    /// [`release_one`](Self::release_one).
    pub fn open_gate(&self) {
        self.gated.store(false, Ordering::SeqCst);
    }

    /// Lets one held call proceed.
    pub fn release_one(&self) {
        self.release.add_permits(1);
    }

    /// Waits until a gated call has been recorded and is being held.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Recorded calls, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<UpdateCall> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Tiers of recorded calls, in order.
    #[must_use]
    pub fn tiers(&self) -> Vec<CapabilityTier> {
        self.calls.lock().iter().map(|call| call.tier).collect()
    }

    fn record(&self, call: UpdateCall) -> Result<(), UpdaterError> {
        self.calls.lock().push(call);
        if self.fail.load(Ordering::SeqCst) {
            return Err(UpdaterError::rejected("scripted updater failure"));
        }
        Ok(())
    }

    async fn hold_at_gate(&self) {
        if self.gated.load(Ordering::SeqCst) {
            self.entered.notify_one();
            if let Ok(permit) = self.release.acquire().await {
                permit.forget();
            }
        }
    }
}

#[async_trait]
impl PostbackUpdater for RecordingUpdater {
    async fn update_postback(
        &self,
        fine_value: u32,
        coarse_value: Option<CoarseValue>,
        lock_window: bool,
    ) -> Result<(), UpdaterError> {
        let result = self.record(UpdateCall {
            tier: CapabilityTier::AsyncPostback,
            fine_value,
            coarse_value,
            lock_window,
        });
        self.hold_at_gate().await;
        result
    }

    async fn update_postback_with_completion(
        &self,
        fine_value: u32,
        coarse_value: Option<CoarseValue>,
        lock_window: bool,
    ) -> Result<(), UpdaterError> {
        let result = self.record(UpdateCall {
            tier: CapabilityTier::CompletionPostback,
            fine_value,
            coarse_value,
            lock_window,
        });
        self.hold_at_gate().await;
        result
    }

    fn update_fine_value(&self, fine_value: u32) -> Result<(), UpdaterError> {
        self.record(UpdateCall {
            tier: CapabilityTier::FineValueOnly,
            fine_value,
            coarse_value: None,
            lock_window: false,
        })
    }
}
