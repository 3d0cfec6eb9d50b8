//! Shared fixtures for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use llm_serving::backend::{BackendError, CompletionBackend};
use llm_serving::batch::{BatchAccumulator, BatchConfig, BatchDispatcher};
use llm_serving::telemetry::InMemoryMetricsSink;
use llm_serving::types::{ChatRequest, ChatResponse, Message, Usage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Backend that echoes the first message back.
///
/// Content `"fail"` yields an HTTP 500 error and `"panic"` panics. The first
/// `n` preflight checks fail when built with `failing_preflights(n)`.
pub struct EchoBackend {
    pub calls: AtomicUsize,
    pub delay: Duration,
    preflight_failures: AtomicUsize,
}

impl EchoBackend {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            preflight_failures: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_preflights(self, n: usize) -> Self {
        self.preflight_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionBackend for EchoBackend {
    async fn complete(
        &self,
        request: &ChatRequest,
        request_id: Option<&str>,
    ) -> Result<ChatResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let text = request.messages[0].content.clone();
        match text.as_str() {
            "fail" => Err(BackendError::Status {
                status: 500,
                message: "backend exploded".into(),
            }),
            "panic" => panic!("backend panicked"),
            _ => Ok(ChatResponse::new(
                request_id.unwrap_or("direct"),
                text,
                "echo-model",
                Usage {
                    prompt_tokens: 1,
                    completion_tokens: 1,
                    total_tokens: 2,
                },
                0.0,
            )),
        }
    }

    async fn preflight(&self) -> Result<(), BackendError> {
        let remaining = self.preflight_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.preflight_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(BackendError::Unavailable("circuit breaker open".into()));
        }
        Ok(())
    }

    fn model(&self) -> &str {
        "echo-model"
    }
}

pub fn user(text: &str) -> ChatRequest {
    ChatRequest::new(vec![Message::user(text)])
}

/// Accumulator over `backend`, with a sink recording batch sizes.
pub fn accumulator(
    backend: Arc<EchoBackend>,
    config: BatchConfig,
) -> (BatchAccumulator, Arc<InMemoryMetricsSink>) {
    let sink = Arc::new(InMemoryMetricsSink::default());
    let dispatcher = BatchDispatcher::new(backend).with_metrics(sink.clone());
    let accumulator = BatchAccumulator::new(config, dispatcher).unwrap();
    (accumulator, sink)
}

/// Batch id part of a response id of the form `{batch_id}-{index}`.
pub fn batch_of(response: &ChatResponse) -> &str {
    response.id.rsplit_once('-').map(|(b, _)| b).unwrap_or("")
}
