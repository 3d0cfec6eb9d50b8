//! 类型模块：定义聊天请求、响应与批处理相关的数据类型。
//!
//! # Types Module
//!
//! Strongly-typed request and response shapes shared by the batching core,
//! the backend client and the HTTP service.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Message`] | Chat message with role and text content |
//! | [`MessageRole`] | Message role (system, user, assistant) |
//! | [`ChatRequest`] | A single validated chat completion request |
//! | [`ChatResponse`] | The per-request completion delivered to a caller |
//! | [`BatchChatRequest`] | Explicit multi-request submission |
//! | [`BatchChatResponse`] | Aggregated result of an explicit batch |
//!
//! ## Example
//!
//! ```rust
//! use llm_serving::types::{ChatRequest, Message};
//!
//! let request = ChatRequest::new(vec![
//!     Message::system("You are a helpful assistant"),
//!     Message::user("Say hello!"),
//! ])
//! .with_max_tokens(50);
//!
//! assert!(request.validate().is_ok());
//! ```

pub mod chat;
pub mod message;

pub use chat::{
    BatchChatRequest, BatchChatResponse, BatchFailure, ChatRequest, ChatResponse, HealthResponse,
    Usage,
};
pub use message::{Message, MessageRole};
