//! 后端协作接口：批处理核心调用推理后端的抽象。
//!
//! Backend seam used by the batching core.
//!
//! The dispatcher only knows [`CompletionBackend`]: one call per request,
//! plus an optional batch-wide [`preflight`](CompletionBackend::preflight)
//! gate. Transport, authentication and retry policy live behind the trait
//! (see [`crate::transport::VllmClient`]).

use crate::transport::TransportError;
use crate::types::{ChatRequest, ChatResponse};
use async_trait::async_trait;

/// Failure of one backend call.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The call panicked. Only the request that issued it fails.
    #[error("backend call panicked: {0}")]
    Panicked(String),
}

impl BackendError {
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Transport(_) | BackendError::Unavailable(_) => true,
            BackendError::Status { status, .. } => *status == 429 || *status >= 500,
            BackendError::InvalidResponse(_) | BackendError::Panicked(_) => false,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        BackendError::Transport(TransportError::Http(e))
    }
}

/// An inference backend that completes one chat request at a time.
///
/// Implementations must be safe to call concurrently; the dispatcher issues
/// all calls of a batch at once so the backend can batch them internally.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Complete a single request. `request_id` overrides the response id when given.
    async fn complete(
        &self,
        request: &ChatRequest,
        request_id: Option<&str>,
    ) -> std::result::Result<ChatResponse, BackendError>;

    /// Batch-wide gate, checked once before a batch fans out.
    async fn preflight(&self) -> std::result::Result<(), BackendError> {
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }

    /// Model identifier reported to clients.
    fn model(&self) -> &str;
}
