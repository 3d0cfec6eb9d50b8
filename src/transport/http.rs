use super::{BackendConfig, TransportError};
use crate::backend::{BackendError, CompletionBackend};
use crate::resilience::CircuitBreaker;
use crate::telemetry::{noop_sink, MetricsSink};
use crate::types::{ChatRequest, ChatResponse, Message, Usage};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};
use url::Url;

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionBody {
    id: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

/// Client for an OpenAI-compatible vLLM server.
///
/// One HTTP call per request; batching across concurrent calls is left to
/// the server. The client never retries.
pub struct VllmClient {
    client: reqwest::Client,
    base_url: Url,
    model: String,
    api_key: Option<String>,
    breaker: Option<CircuitBreaker>,
    metrics: Arc<dyn MetricsSink>,
}

impl VllmClient {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let mut base_url = Url::parse(&config.base_url).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid backend base URL '{}'", config.base_url),
                ErrorContext::new()
                    .with_field_path("backend.base_url")
                    .with_details(e.to_string()),
            )
        })?;
        // Keep any path prefix when joining endpoint paths.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        let breaker = config
            .circuit_breaker
            .is_enabled()
            .then(|| CircuitBreaker::new(config.circuit_breaker.clone()));

        Ok(Self {
            client,
            base_url,
            model: config.model,
            api_key: config.api_key.filter(|k| !k.is_empty()),
            breaker,
            metrics: noop_sink(),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_ref()
    }

    fn endpoint(&self, path: &str) -> std::result::Result<Url, BackendError> {
        self.base_url
            .join(path)
            .map_err(|e| BackendError::Transport(TransportError::Other(e.to_string())))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn send_completion(
        &self,
        request: &ChatRequest,
        request_id: Option<&str>,
        started: Instant,
    ) -> std::result::Result<ChatResponse, BackendError> {
        let body = CompletionRequest {
            model: &self.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: false,
        };
        let url = self.endpoint("v1/chat/completions")?;
        let resp = self.authorize(self.client.post(url).json(&body)).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let completion: CompletionBody = resp
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| {
                BackendError::InvalidResponse("missing choices[0].message.content".into())
            })?;

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        Ok(ChatResponse::new(
            request_id.map(str::to_string).unwrap_or(completion.id),
            content,
            completion.model.unwrap_or_else(|| self.model.clone()),
            completion.usage.unwrap_or_default(),
            latency_ms,
        ))
    }
}

#[async_trait]
impl CompletionBackend for VllmClient {
    async fn complete(
        &self,
        request: &ChatRequest,
        request_id: Option<&str>,
    ) -> std::result::Result<ChatResponse, BackendError> {
        let started = Instant::now();
        let result = self.send_completion(request, request_id, started).await;
        let latency_secs = started.elapsed().as_secs_f64();
        self.metrics.record_backend_call(result.is_ok(), latency_secs);

        match &result {
            Ok(resp) => {
                debug!(request_id = %resp.id, latency_ms = resp.latency_ms, "vLLM request completed");
                if let Some(b) = &self.breaker {
                    b.on_success();
                }
            }
            Err(e) => {
                error!(request_id = request_id.unwrap_or("-"), error = %e, "vLLM request failed");
                if let Some(b) = &self.breaker {
                    b.on_failure();
                }
            }
        }
        result
    }

    async fn preflight(&self) -> std::result::Result<(), BackendError> {
        match &self.breaker {
            Some(b) => b.check(),
            None => Ok(()),
        }
    }

    async fn health_check(&self) -> bool {
        let url = match self.endpoint("v1/models") {
            Ok(url) => url,
            Err(_) => return false,
        };
        let resp = match self.authorize(self.client.get(url)).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                warn!(status = resp.status().as_u16(), "Health check failed");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "Health check failed");
                return false;
            }
        };
        match resp.json::<ModelList>().await {
            Ok(list) => !list.data.is_empty(),
            Err(e) => {
                warn!(error = %e, "Health check returned an unreadable model list");
                false
            }
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}
