//! Batch dispatcher.

use crate::backend::{BackendError, CompletionBackend};
use crate::telemetry::{noop_sink, MetricsSink};
use crate::types::{BatchFailure, ChatRequest, ChatResponse};
use crate::{Error, Result};
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Outcome of one request inside a batch.
pub type BatchOutcome = Result<ChatResponse>;

/// Outcomes of one dispatch, aligned with the request order.
#[derive(Debug)]
pub struct DispatchReport {
    pub batch_id: String,
    pub outcomes: Vec<BatchOutcome>,
    pub execution_time: Duration,
}

impl DispatchReport {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }
    pub fn failure_count(&self) -> usize {
        self.len() - self.success_count()
    }
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.is_ok())
    }
    pub fn success_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            0.0
        } else {
            self.success_count() as f64 / self.len() as f64
        }
    }

    /// Split into successful responses and indexed failures, order kept.
    pub fn partition(self) -> (Vec<ChatResponse>, Vec<BatchFailure>) {
        let mut responses = Vec::new();
        let mut failures = Vec::new();
        for (index, outcome) in self.outcomes.into_iter().enumerate() {
            match outcome {
                Ok(r) => responses.push(r),
                Err(e) => failures.push(BatchFailure {
                    index,
                    error: e.to_string(),
                }),
            }
        }
        (responses, failures)
    }
}

/// Fans a batch out to the backend, one concurrent call per request.
#[derive(Clone)]
pub struct BatchDispatcher {
    backend: Arc<dyn CompletionBackend>,
    metrics: Arc<dyn MetricsSink>,
}

impl BatchDispatcher {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            backend,
            metrics: noop_sink(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn backend(&self) -> &Arc<dyn CompletionBackend> {
        &self.backend
    }

    /// Report a batch that never produced a [`DispatchReport`].
    pub(crate) fn record_aborted(&self, batch_size: usize, elapsed: Duration) {
        self.metrics.record_batch(batch_size, elapsed.as_secs_f64());
    }

    /// Dispatch `requests` and wait for every call to settle.
    ///
    /// `outcomes[i]` always belongs to `requests[i]`. A failed preflight fails
    /// every request of this batch with [`Error::BatchDispatch`] and issues no calls.
    /// A call that panics fails only its own request, with [`BackendError::Panicked`].
    pub async fn dispatch(&self, batch_id: &str, requests: &[ChatRequest]) -> DispatchReport {
        let start = Instant::now();
        let batch_size = requests.len();

        let outcomes = match self.backend.preflight().await {
            Err(e) => {
                warn!(batch_id, batch_size, error = %e, "Batch preflight failed");
                let message = e.to_string();
                requests
                    .iter()
                    .map(|_| Err(Error::batch_dispatch(batch_id, message.clone())))
                    .collect()
            }
            Ok(()) => {
                let calls = requests.iter().enumerate().map(|(i, request)| {
                    let request_id = format!("{}-{}", batch_id, i);
                    let backend = &self.backend;
                    async move {
                        match AssertUnwindSafe(backend.complete(request, Some(&request_id)))
                            .catch_unwind()
                            .await
                        {
                            Ok(result) => result.map_err(Error::from),
                            Err(payload) => {
                                Err(Error::from(BackendError::Panicked(panic_message(payload))))
                            }
                        }
                    }
                });
                join_all(calls).await
            }
        };

        let execution_time = start.elapsed();
        self.metrics
            .record_batch(batch_size, execution_time.as_secs_f64());

        let report = DispatchReport {
            batch_id: batch_id.to_string(),
            outcomes,
            execution_time,
        };

        let elapsed_ms = execution_time.as_secs_f64() * 1000.0;
        let throughput = if elapsed_ms > 0.0 {
            batch_size as f64 / (elapsed_ms / 1000.0)
        } else {
            0.0
        };
        info!(
            batch_id,
            batch_size,
            succeeded = report.success_count(),
            elapsed_ms,
            "Batch completed ({:.2} req/s)",
            throughput
        );
        for (i, outcome) in report.outcomes.iter().enumerate() {
            if let Err(e) = outcome {
                warn!(batch_id, index = i, error = %e, "Batch request failed");
            }
        }

        report
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
