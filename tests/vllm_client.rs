//! vLLM client against a mock OpenAI-compatible server.

use llm_serving::backend::{BackendError, CompletionBackend};
use llm_serving::batch::{BatchAccumulator, BatchConfig, BatchDispatcher};
use llm_serving::resilience::CircuitBreakerConfig;
use llm_serving::telemetry::{InMemoryMetricsSink, MetricEvent};
use llm_serving::transport::{BackendConfig, VllmClient};
use llm_serving::types::{ChatRequest, Message};
use llm_serving::Error;
use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const COMPLETIONS: &str = "/v1/chat/completions";

fn completion_body(content: &str) -> String {
    json!({
        "id": "cmpl-42",
        "object": "chat.completion",
        "model": "test-model",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 5, "completion_tokens": 3, "total_tokens": 8}
    })
    .to_string()
}

fn client_for(server: &ServerGuard) -> VllmClient {
    VllmClient::new(
        BackendConfig::new(server.url())
            .with_model("test-model")
            .with_api_key("secret"),
    )
    .unwrap()
}

fn hello() -> ChatRequest {
    ChatRequest::new(vec![Message::user("Hello")]).with_max_tokens(64)
}

#[tokio::test]
async fn test_completion_request_shape_and_response() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", COMPLETIONS)
        .match_header("authorization", "Bearer secret")
        .match_body(Matcher::PartialJson(json!({
            "model": "test-model",
            "messages": [{"role": "user", "content": "Hello"}],
            "max_tokens": 64,
            "stream": false
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(completion_body("Hi there"))
        .create_async()
        .await;

    let client = client_for(&server);
    let response = client.complete(&hello(), None).await.unwrap();

    mock.assert_async().await;
    assert_eq!(response.id, "cmpl-42");
    assert_eq!(response.response, "Hi there");
    assert_eq!(response.model, "test-model");
    assert_eq!(response.usage.total_tokens, 8);
    assert!(response.latency_ms >= 0.0);
}

#[tokio::test]
async fn test_request_id_overrides_completion_id() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", COMPLETIONS)
        .with_status(200)
        .with_body(completion_body("ok"))
        .create_async()
        .await;

    let response = client_for(&server)
        .complete(&hello(), Some("batch-7-0"))
        .await
        .unwrap();
    assert_eq!(response.id, "batch-7-0");
}

#[tokio::test]
async fn test_error_status_is_reported() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", COMPLETIONS)
        .with_status(503)
        .with_body("model loading")
        .create_async()
        .await;

    match client_for(&server).complete(&hello(), None).await {
        Err(BackendError::Status { status, message }) => {
            assert_eq!(status, 503);
            assert_eq!(message, "model loading");
        }
        other => panic!("expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_content_is_invalid_response() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", COMPLETIONS)
        .with_status(200)
        .with_body(json!({"id": "cmpl-1", "choices": []}).to_string())
        .create_async()
        .await;

    let result = client_for(&server).complete(&hello(), None).await;
    assert!(matches!(result, Err(BackendError::InvalidResponse(_))));
}

#[tokio::test]
async fn test_backend_calls_are_recorded() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", COMPLETIONS)
        .match_body(Matcher::Regex(r#""content":"Hello""#.to_string()))
        .with_status(200)
        .with_body(completion_body("ok"))
        .create_async()
        .await;
    server
        .mock("POST", COMPLETIONS)
        .match_body(Matcher::Regex(r#""content":"bad""#.to_string()))
        .with_status(500)
        .create_async()
        .await;

    let sink = Arc::new(InMemoryMetricsSink::default());
    let client = client_for(&server).with_metrics(sink.clone());
    client.complete(&hello(), None).await.unwrap();
    let bad = ChatRequest::new(vec![Message::user("bad")]);
    assert!(client.complete(&bad, None).await.is_err());

    let outcomes: Vec<bool> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            MetricEvent::BackendCall { success, .. } => Some(success),
            _ => None,
        })
        .collect();
    assert_eq!(outcomes, vec![true, false]);
}

#[tokio::test]
async fn test_health_check() {
    let mut server = Server::new_async().await;
    let healthy = server
        .mock("GET", "/v1/models")
        .with_status(200)
        .with_body(json!({"object": "list", "data": [{"id": "test-model"}]}).to_string())
        .create_async()
        .await;
    assert!(client_for(&server).health_check().await);
    healthy.remove_async().await;

    let empty = server
        .mock("GET", "/v1/models")
        .with_status(200)
        .with_body(json!({"data": []}).to_string())
        .create_async()
        .await;
    assert!(!client_for(&server).health_check().await);
    empty.remove_async().await;

    server
        .mock("GET", "/v1/models")
        .with_status(500)
        .create_async()
        .await;
    assert!(!client_for(&server).health_check().await);
}

#[tokio::test]
async fn test_unreachable_server_is_unhealthy() {
    let client = VllmClient::new(
        BackendConfig::new("http://127.0.0.1:1").with_timeout(Duration::from_secs(2)),
    )
    .unwrap();
    assert!(!client.health_check().await);
    assert!(matches!(
        client.complete(&hello(), None).await,
        Err(BackendError::Transport(_))
    ));
}

#[tokio::test]
async fn test_open_breaker_fails_whole_batch_without_calls() {
    let mut server = Server::new_async().await;
    let failing = server
        .mock("POST", COMPLETIONS)
        .with_status(500)
        .expect(2)
        .create_async()
        .await;

    let client = VllmClient::new(
        BackendConfig::new(server.url()).with_circuit_breaker(
            CircuitBreakerConfig::new()
                .with_failure_threshold(2)
                .with_cooldown(Duration::from_secs(60)),
        ),
    )
    .unwrap();
    let accumulator = BatchAccumulator::new(
        BatchConfig::new()
            .with_max_batch_size(2)
            .with_flush_timeout(Duration::from_millis(10)),
        BatchDispatcher::new(Arc::new(client)),
    )
    .unwrap();

    let first = vec![
        accumulator.submit(hello()).unwrap(),
        accumulator.submit(hello()).unwrap(),
    ];
    for outcome in futures::future::join_all(first).await {
        assert!(matches!(outcome, Err(Error::Backend(BackendError::Status { .. }))));
    }

    let second = vec![
        accumulator.submit(hello()).unwrap(),
        accumulator.submit(hello()).unwrap(),
    ];
    for outcome in futures::future::join_all(second).await {
        assert!(matches!(outcome, Err(Error::BatchDispatch { .. })));
    }

    failing.assert_async().await;
}
