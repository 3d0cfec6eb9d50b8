//! Chat request/response schema and validation.

use super::message::Message;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_MAX_TOKENS: u32 = 512;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const MAX_TOKENS_LIMIT: u32 = 2048;
pub const MAX_TEMPERATURE: f32 = 2.0;

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

pub(crate) fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A single chat completion request.
///
/// `stream` is accepted for client compatibility; responses are always
/// delivered whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            stream: false,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Check the field ranges the backend accepts.
    pub fn validate(&self) -> Result<()> {
        if self.messages.is_empty() {
            return Err(Error::validation_with_context(
                "at least one message is required",
                ErrorContext::new()
                    .with_field_path("request.messages")
                    .with_source("request_validator"),
            ));
        }
        if !(1..=MAX_TOKENS_LIMIT).contains(&self.max_tokens) {
            return Err(Error::validation_with_context(
                "max_tokens out of range",
                ErrorContext::new()
                    .with_field_path("request.max_tokens")
                    .with_details(format!(
                        "expected 1..={}, got {}",
                        MAX_TOKENS_LIMIT, self.max_tokens
                    ))
                    .with_source("request_validator"),
            ));
        }
        // NaN fails the range check too.
        if !(0.0..=MAX_TEMPERATURE).contains(&self.temperature) {
            return Err(Error::validation_with_context(
                "temperature out of range",
                ErrorContext::new()
                    .with_field_path("request.temperature")
                    .with_details(format!(
                        "expected 0.0..={}, got {}",
                        MAX_TEMPERATURE, self.temperature
                    ))
                    .with_source("request_validator"),
            ));
        }
        Ok(())
    }
}

/// Token accounting reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Completed response for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub response: String,
    pub model: String,
    pub usage: Usage,
    pub latency_ms: f64,
    /// Unix seconds.
    pub created_at: u64,
}

impl ChatResponse {
    pub fn new(
        id: impl Into<String>,
        response: impl Into<String>,
        model: impl Into<String>,
        usage: Usage,
        latency_ms: f64,
    ) -> Self {
        Self {
            id: id.into(),
            response: response.into(),
            model: model.into(),
            usage,
            latency_ms,
            created_at: unix_timestamp(),
        }
    }
}

/// Several requests sent together, bypassing the accumulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchChatRequest {
    pub requests: Vec<ChatRequest>,
    #[serde(default)]
    pub batch_id: Option<String>,
}

impl BatchChatRequest {
    pub fn validate(&self) -> Result<()> {
        if self.requests.is_empty() {
            return Err(Error::validation_with_context(
                "Empty batch",
                ErrorContext::new()
                    .with_field_path("batch.requests")
                    .with_source("request_validator"),
            ));
        }
        for (i, request) in self.requests.iter().enumerate() {
            request.validate().map_err(|e| match e {
                Error::Validation {
                    message,
                    mut context,
                } => {
                    context.field_path = context
                        .field_path
                        .map(|p| p.replacen("request", &format!("batch.requests[{}]", i), 1));
                    Error::Validation { message, context }
                }
                other => other,
            })?;
        }
        Ok(())
    }
}

/// One failed entry of an explicit batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub index: usize,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchChatResponse {
    pub batch_id: String,
    pub responses: Vec<ChatResponse>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<BatchFailure>,
    pub total_latency_ms: f64,
    pub batch_size: usize,
    /// Successful responses per second.
    pub throughput: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub vllm_connected: bool,
    pub model: String,
}

impl HealthResponse {
    pub fn new(vllm_connected: bool, model: impl Into<String>) -> Self {
        Self {
            status: if vllm_connected { "healthy" } else { "degraded" }.to_string(),
            vllm_connected,
            model: model.into(),
        }
    }
}
