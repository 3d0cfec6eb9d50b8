//! Route handlers.

use super::error::ApiError;
use super::AppState;
use crate::backend::CompletionBackend;
use crate::batch::BatchStats;
use crate::types::{BatchChatRequest, BatchChatResponse, ChatRequest, ChatResponse, HealthResponse};
use crate::Error;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

pub const SERVICE_NAME: &str = "LLM Serving Platform";

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// GET /
pub async fn root(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "name": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "vllm_model": state.backend.model(),
    }))
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let connected = state.backend.health_check().await;
    Json(HealthResponse::new(connected, state.backend.model()))
}

/// POST /api/v1/chat
///
/// Single request straight to the backend, no batching.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<ChatResponse> {
    request.validate()?;
    let response = state
        .backend
        .complete(&request, None)
        .await
        .map_err(Error::from)?;
    Ok(Json(response))
}

/// POST /api/v1/chat/batch
///
/// Joins whatever batch is forming in the accumulator.
pub async fn chat_with_batch(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<ChatResponse> {
    request.validate()?;
    let response = state.accumulator.submit_and_wait(request).await?;
    Ok(Json(response))
}

/// POST /api/v1/batch/chat
///
/// Caller-assembled batch, dispatched as is.
pub async fn batch_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BatchChatRequest>,
) -> ApiResult<BatchChatResponse> {
    request.validate()?;
    let batch_id = request
        .batch_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let started = Instant::now();
    let report = state.dispatcher.dispatch(&batch_id, &request.requests).await;
    let total_secs = started.elapsed().as_secs_f64();

    let (responses, failures) = report.partition();
    let throughput = if total_secs > 0.0 {
        responses.len() as f64 / total_secs
    } else {
        0.0
    };
    Ok(Json(BatchChatResponse {
        batch_id,
        batch_size: responses.len(),
        responses,
        failures,
        total_latency_ms: total_secs * 1000.0,
        throughput,
    }))
}

/// GET /api/v1/batch/stats
pub async fn batch_stats(State(state): State<Arc<AppState>>) -> Json<BatchStats> {
    Json(state.accumulator.stats())
}

/// GET /metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let Some(sink) = &state.prometheus else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match sink.render() {
        Ok(body) => ([(header::CONTENT_TYPE, sink.content_type())], body).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

