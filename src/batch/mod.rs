//! 请求批处理模块：将并发提交的请求聚合为批次并统一派发。
//!
//! # Request Batching Module
//!
//! Requests submitted concurrently are collected into a FIFO queue and
//! dispatched to the backend in batches. A batch is flushed when it reaches
//! `max_batch_size` or when the oldest queued request has waited
//! `flush_timeout`, whichever comes first. At most one flush cycle runs at a
//! time.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`BatchAccumulator`] | Queues requests and runs the flush cycle |
//! | [`BatchConfig`] | Batch size, flush window and queue depth |
//! | [`BatchHandle`] | Awaitable outcome of one submitted request |
//! | [`BatchDispatcher`] | Fans one batch out to a [`CompletionBackend`](crate::backend::CompletionBackend) |
//! | [`StatsTracker`] | Running counters and means, read via [`BatchStats`] |
//!
//! ## Example
//!
//! ```rust,no_run
//! use llm_serving::batch::{BatchAccumulator, BatchConfig, BatchDispatcher};
//! use llm_serving::transport::{BackendConfig, VllmClient};
//! use llm_serving::types::{ChatRequest, Message};
//! use std::sync::Arc;
//!
//! # async fn run() -> llm_serving::Result<()> {
//! let client = VllmClient::new(BackendConfig::default())?;
//! let dispatcher = BatchDispatcher::new(Arc::new(client));
//! let accumulator = BatchAccumulator::new(BatchConfig::new().with_max_batch_size(8), dispatcher)?;
//!
//! let response = accumulator
//!     .submit_and_wait(ChatRequest::new(vec![Message::user("Hello")]))
//!     .await?;
//! println!("{}", response.response);
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure scope
//!
//! A failure is delivered only to the requests it concerns. One failed backend
//! call fails one request; a failed preflight or a panic during dispatch fails
//! the current batch and leaves later batches untouched.

mod collector;
mod executor;
pub mod slot;
mod stats;

pub use collector::{BatchAccumulator, BatchConfig, BatchHandle, FlushPhase};
pub use executor::{BatchDispatcher, BatchOutcome, DispatchReport};
pub use stats::{BatchStats, StatsTracker};
