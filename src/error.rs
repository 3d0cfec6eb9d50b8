use crate::backend::BackendError;
use crate::transport::TransportError;
use thiserror::Error;

/// Structured error context for configuration, validation and runtime failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "batch.max_batch_size", "request.temperature")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config_loader", "request_validator")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the serving runtime.
///
/// Every outcome delivered on a [`crate::batch::BatchHandle`] is either a
/// response or one of these variants.
#[derive(Debug, Error)]
pub enum Error {
    /// A single backend call failed. Only the caller that issued it sees this.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// The batch failed as a whole before per-request outcomes existed.
    #[error("Batch {batch_id} dispatch failed: {message}")]
    BatchDispatch { batch_id: String, message: String },

    #[error("Queue saturated: {depth} pending requests (limit {limit})")]
    QueueSaturated { depth: usize, limit: usize },

    #[error("Request cancelled before dispatch")]
    Cancelled,

    #[error("Batch accumulator is shutting down")]
    Shutdown,

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("Network transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn batch_dispatch(batch_id: impl Into<String>, message: impl Into<String>) -> Self {
        Error::BatchDispatch {
            batch_id: batch_id.into(),
            message: message.into(),
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::Validation { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Stable snake_case label, used in logs and API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Backend(_) => "backend_error",
            Error::BatchDispatch { .. } => "batch_dispatch_error",
            Error::QueueSaturated { .. } => "queue_saturated",
            Error::Cancelled => "cancelled",
            Error::Shutdown => "shutdown",
            Error::Configuration { .. } => "configuration_error",
            Error::Validation { .. } => "validation_error",
            Error::Runtime { .. } => "runtime_error",
            Error::Transport(_) => "transport_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Yaml(_) => "yaml_error",
            Error::Metrics(_) => "metrics_error",
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::QueueSaturated { .. } | Error::BatchDispatch { .. } => true,
            Error::Backend(e) => e.is_retryable(),
            Error::Transport(_) => true,
            _ => false,
        }
    }
}
