//! Batch accumulator.

use super::executor::{BatchDispatcher, BatchOutcome};
use super::slot::{self, ResponseHandle, ResponseSlot};
use super::stats::{BatchStats, StatsTracker};
use crate::types::{ChatRequest, ChatResponse};
use crate::{Error, ErrorContext, Result};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    /// Wait window of a flush cycle, measured from the oldest queued request.
    #[serde(rename = "flush_timeout_ms", with = "duration_ms")]
    pub flush_timeout: Duration,
    /// Admission bound; `submit` fails once this many requests are queued.
    pub max_queue_depth: usize,
}
impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 32,
            flush_timeout: Duration::from_millis(100),
            max_queue_depth: 1024,
        }
    }
}
impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_max_batch_size(mut self, s: usize) -> Self {
        self.max_batch_size = s;
        self
    }
    pub fn with_flush_timeout(mut self, t: Duration) -> Self {
        self.flush_timeout = t;
        self
    }
    pub fn with_max_queue_depth(mut self, d: usize) -> Self {
        self.max_queue_depth = d;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(Error::configuration_with_context(
                "max_batch_size must be at least 1",
                ErrorContext::new().with_field_path("batch.max_batch_size"),
            ));
        }
        if self.max_queue_depth == 0 {
            return Err(Error::configuration_with_context(
                "max_queue_depth must be at least 1",
                ErrorContext::new().with_field_path("batch.max_queue_depth"),
            ));
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Lifecycle of the single flush cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPhase {
    /// No cycle running; the next submission starts one.
    Idle,
    /// A cycle is waiting for its window to close or the batch to fill.
    Waiting,
    /// A cycle has taken a batch and is dispatching it.
    Draining,
}

struct PendingRequest {
    id: u64,
    request: ChatRequest,
    enqueued_at: Instant,
    slot: ResponseSlot<Result<ChatResponse>>,
}

struct QueueState {
    queue: VecDeque<PendingRequest>,
    phase: FlushPhase,
}

struct Shared {
    config: BatchConfig,
    dispatcher: BatchDispatcher,
    state: Mutex<QueueState>,
    stats: StatsTracker,
    next_id: AtomicU64,
    /// Wakes a waiting cycle when the batch fills or on shutdown.
    wake: Notify,
    /// Signalled whenever the cycle returns to `Idle`.
    idle: Notify,
    shutdown: CancellationToken,
    runtime: Handle,
}

/// Collects submitted requests into batches and dispatches them.
///
/// Cloning is cheap; clones share one queue and one flush cycle.
#[derive(Clone)]
pub struct BatchAccumulator {
    shared: Arc<Shared>,
}

impl BatchAccumulator {
    /// Must be called inside a tokio runtime; flush cycles are spawned on it.
    pub fn new(config: BatchConfig, dispatcher: BatchDispatcher) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| {
            Error::configuration_with_context(
                "BatchAccumulator requires a tokio runtime",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("batch_accumulator"),
            )
        })?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                dispatcher,
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    phase: FlushPhase::Idle,
                }),
                stats: StatsTracker::new(),
                next_id: AtomicU64::new(1),
                wake: Notify::new(),
                idle: Notify::new(),
                shutdown: CancellationToken::new(),
                runtime,
            }),
        })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.shared.config
    }

    /// Enqueue `request` and return a handle to its eventual outcome.
    ///
    /// Fails immediately with [`Error::QueueSaturated`] when the queue is at
    /// `max_queue_depth`, or [`Error::Shutdown`] after [`shutdown`](Self::shutdown).
    pub fn submit(&self, request: ChatRequest) -> Result<BatchHandle> {
        let shared = &self.shared;
        let (slot, handle) = slot::channel();
        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);

        let mut state = shared.lock();
        if shared.shutdown.is_cancelled() {
            return Err(Error::Shutdown);
        }
        let depth = state.queue.len();
        if depth >= shared.config.max_queue_depth {
            drop(state);
            shared.stats.record_rejected();
            warn!(
                queue_depth = depth,
                limit = shared.config.max_queue_depth,
                "Rejecting request, queue saturated"
            );
            return Err(Error::QueueSaturated {
                depth,
                limit: shared.config.max_queue_depth,
            });
        }

        state.queue.push_back(PendingRequest {
            id,
            request,
            enqueued_at: Instant::now(),
            slot,
        });
        shared.stats.record_request();
        let queue_depth = state.queue.len();

        match state.phase {
            FlushPhase::Idle => {
                // Claimed under the queue lock: concurrent submitters see Waiting.
                state.phase = FlushPhase::Waiting;
                drop(state);
                let cycle = Arc::clone(shared);
                shared.runtime.spawn(async move { cycle.run_flush_cycle().await });
            }
            FlushPhase::Waiting if queue_depth >= shared.config.max_batch_size => {
                drop(state);
                shared.wake.notify_one();
            }
            _ => drop(state),
        }

        debug!(request_id = id, queue_depth, "Request enqueued");
        Ok(BatchHandle {
            id,
            inner: handle,
            owner: Arc::downgrade(shared),
        })
    }

    /// Submit and wait for the outcome.
    pub async fn submit_and_wait(&self, request: ChatRequest) -> Result<ChatResponse> {
        self.submit(request)?.await
    }

    /// Withdraw a request that has not been dispatched yet.
    ///
    /// Returns `true` and resolves the handle with [`Error::Cancelled`] if the
    /// request was still queued. Once its batch is dispatching this is a no-op.
    pub fn cancel(&self, handle: &BatchHandle) -> bool {
        self.shared.remove_queued(handle.id)
    }

    pub fn stats(&self) -> BatchStats {
        self.shared.stats.snapshot()
    }

    pub fn queue_depth(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn phase(&self) -> FlushPhase {
        self.shared.lock().phase
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Stop admitting requests and drain everything already queued.
    ///
    /// Queued requests are dispatched without waiting out their window;
    /// returns once the accumulator is idle.
    pub async fn shutdown(&self) {
        let shared = &self.shared;
        shared.shutdown.cancel();
        shared.wake.notify_one();
        info!(
            queue_depth = self.queue_depth(),
            "Batch accumulator shutting down"
        );
        loop {
            let idle = shared.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            if shared.is_idle() {
                break;
            }
            idle.await;
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_idle(&self) -> bool {
        let state = self.lock();
        state.phase == FlushPhase::Idle && state.queue.is_empty()
    }

    fn mark_idle(&self, mut state: MutexGuard<'_, QueueState>) {
        state.phase = FlushPhase::Idle;
        drop(state);
        self.idle.notify_waiters();
    }

    fn remove_queued(&self, id: u64) -> bool {
        let mut removed = {
            let mut state = self.lock();
            match state.queue.iter().position(|p| p.id == id) {
                Some(pos) => state.queue.remove(pos),
                None => None,
            }
        };
        match removed.as_mut() {
            Some(pending) => {
                pending.slot.resolve(Err(Error::Cancelled));
                self.stats.record_cancelled();
                debug!(request_id = id, "Request cancelled before dispatch");
                true
            }
            None => false,
        }
    }

    /// Body of the spawned flush task. Runs until the queue is empty.
    async fn run_flush_cycle(self: Arc<Self>) {
        loop {
            let deadline = {
                let state = self.lock();
                let oldest = state.queue.front().map(|p| p.enqueued_at);
                match oldest {
                    Some(enqueued_at) => enqueued_at + self.config.flush_timeout,
                    None => return self.mark_idle(state),
                }
            };

            self.wait_for_batch(deadline).await;

            let batch: Vec<PendingRequest> = {
                let mut state = self.lock();
                let take = state.queue.len().min(self.config.max_batch_size);
                if take == 0 {
                    return self.mark_idle(state);
                }
                state.phase = FlushPhase::Draining;
                state.queue.drain(..take).collect()
            };

            self.dispatch_batch(batch).await;

            {
                let mut state = self.lock();
                if state.queue.is_empty() {
                    return self.mark_idle(state);
                }
                state.phase = FlushPhase::Waiting;
            }
        }
    }

    async fn wait_for_batch(&self, deadline: Instant) {
        loop {
            let full = self.lock().queue.len() >= self.config.max_batch_size;
            if full || self.shutdown.is_cancelled() {
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return,
                _ = self.wake.notified() => {}
                _ = self.shutdown.cancelled() => return,
            }
        }
    }

    async fn dispatch_batch(&self, batch: Vec<PendingRequest>) {
        let batch_id = Uuid::new_v4().to_string();
        let batch_size = batch.len();
        let started = Instant::now();

        let mut slots = Vec::with_capacity(batch_size);
        let mut requests = Vec::with_capacity(batch_size);
        for pending in batch {
            slots.push(pending.slot);
            requests.push(pending.request);
        }

        info!(batch_id = %batch_id, batch_size, "Processing batch");

        let dispatched = AssertUnwindSafe(self.dispatcher.dispatch(&batch_id, &requests))
            .catch_unwind()
            .await;

        let mut outcomes: Vec<BatchOutcome> = match dispatched {
            Ok(report) => report.outcomes,
            Err(_) => {
                error!(batch_id = %batch_id, batch_size, "Batch dispatch panicked");
                self.dispatcher.record_aborted(batch_size, started.elapsed());
                (0..batch_size)
                    .map(|_| Err(Error::batch_dispatch(batch_id.as_str(), "batch dispatch panicked")))
                    .collect()
            }
        };
        outcomes.truncate(batch_size);
        while outcomes.len() < batch_size {
            outcomes.push(Err(Error::batch_dispatch(
                batch_id.as_str(),
                "no outcome produced for request",
            )));
        }

        // Stats land before any caller is woken.
        let failures = outcomes.iter().filter(|o| o.is_err()).count();
        self.stats
            .record_batch(batch_size, started.elapsed(), failures);

        for (slot, outcome) in slots.iter_mut().zip(outcomes) {
            slot.resolve(outcome);
        }
    }
}

/// Caller side of a submitted request. Await it for the outcome.
///
/// Dropping a handle whose request is still queued withdraws the request.
#[derive(Debug)]
pub struct BatchHandle {
    id: u64,
    inner: ResponseHandle<Result<ChatResponse>>,
    owner: Weak<Shared>,
}

impl BatchHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Non-blocking check of the outcome.
    ///
    /// `None` while the request is pending. The outcome is handed out once;
    /// later calls return `None` and awaiting the handle reports it as spent.
    pub fn try_take(&mut self) -> Option<Result<ChatResponse>> {
        match self.inner.try_take() {
            Ok(v) => v,
            Err(_) => Some(Err(unresolved_error())),
        }
    }
}

fn spent_error() -> Error {
    Error::runtime_with_context(
        "outcome already taken from this handle",
        ErrorContext::new().with_source("batch_accumulator"),
    )
}

fn unresolved_error() -> Error {
    Error::runtime_with_context(
        "request dropped before it was resolved",
        ErrorContext::new().with_source("batch_accumulator"),
    )
}

impl Future for BatchHandle {
    type Output = Result<ChatResponse>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.inner.is_taken() {
            return Poll::Ready(Err(spent_error()));
        }
        Pin::new(&mut self.inner)
            .poll(cx)
            .map(|r| r.unwrap_or_else(|_| Err(unresolved_error())))
    }
}

impl Drop for BatchHandle {
    fn drop(&mut self) {
        if let Some(shared) = self.owner.upgrade() {
            shared.remove_queued(self.id);
        }
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchAccumulator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
