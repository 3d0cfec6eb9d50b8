//! # llm-serving
//!
//! 面向 vLLM 的请求批处理服务：将并发的聊天请求聚合成批次，统一派发到推理后端。
//!
//! Request batching front end for an OpenAI-compatible vLLM server.
//!
//! ## Overview
//!
//! Concurrent chat requests are accumulated into batches and dispatched to the
//! inference backend together, so the server's continuous batching sees many
//! requests at once. Every caller gets exactly its own outcome back: a failure
//! of one backend call never leaks into another request.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use llm_serving::batch::{BatchAccumulator, BatchConfig, BatchDispatcher};
//! use llm_serving::transport::{BackendConfig, VllmClient};
//! use llm_serving::{ChatRequest, Message};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> llm_serving::Result<()> {
//!     let client = VllmClient::new(BackendConfig::new("http://localhost:8000"))?;
//!     let accumulator = BatchAccumulator::new(
//!         BatchConfig::new()
//!             .with_max_batch_size(16)
//!             .with_flush_timeout(Duration::from_millis(50)),
//!         BatchDispatcher::new(Arc::new(client)),
//!     )?;
//!
//!     let handle = accumulator.submit(ChatRequest::new(vec![Message::user("Hello!")]))?;
//!     let response = handle.await?;
//!     println!("{} ({:.1} ms)", response.response, response.latency_ms);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`batch`] | Accumulator, dispatcher, result slots and statistics |
//! | [`backend`] | The [`CompletionBackend`](backend::CompletionBackend) seam |
//! | [`transport`] | vLLM HTTP client |
//! | [`resilience`] | Circuit breaker consulted before each batch |
//! | [`telemetry`] | Metrics sinks, Prometheus included |
//! | [`server`] | axum routes |
//! | [`config`] | Layered service configuration |
//! | [`types`] | Request and response types |

pub mod backend;
pub mod batch;
pub mod config;
pub mod resilience;
pub mod server;
pub mod telemetry;
pub mod transport;
pub mod types;

pub use batch::{BatchAccumulator, BatchConfig, BatchHandle, BatchStats};
pub use types::{ChatRequest, ChatResponse, Message, MessageRole};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
