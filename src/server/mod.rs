//! HTTP 服务模块：基于 axum 暴露聊天、批处理与监控接口。
//!
//! # HTTP Service
//!
//! | Route | Handler |
//! |-------|---------|
//! | `GET /` | service name, version and model |
//! | `GET /health` | backend reachability |
//! | `POST /api/v1/chat` | single request, no batching |
//! | `POST /api/v1/chat/batch` | request joins the accumulator |
//! | `POST /api/v1/batch/chat` | explicit batch |
//! | `GET /api/v1/batch/stats` | accumulator statistics |
//! | `GET /metrics` | Prometheus exposition, when metrics are enabled |

pub mod error;
pub mod routes;

pub use error::ApiError;

use crate::backend::CompletionBackend;
use crate::batch::{BatchAccumulator, BatchConfig, BatchDispatcher};
use crate::config::ServingConfig;
use crate::telemetry::{noop_sink, MetricsSink, PrometheusMetricsSink};
use crate::transport::VllmClient;
use crate::Result;
use axum::{
    extract::{MatchedPath, Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

/// Shared handler state.
pub struct AppState {
    pub backend: Arc<dyn CompletionBackend>,
    pub dispatcher: BatchDispatcher,
    pub accumulator: BatchAccumulator,
    /// Present when metrics are enabled.
    pub prometheus: Option<PrometheusMetricsSink>,
}

impl AppState {
    /// Must be called inside a tokio runtime.
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        batch: BatchConfig,
        prometheus: Option<PrometheusMetricsSink>,
    ) -> Result<Self> {
        let sink: Arc<dyn MetricsSink> = match &prometheus {
            Some(p) => Arc::new(p.clone()),
            None => noop_sink(),
        };
        let dispatcher = BatchDispatcher::new(Arc::clone(&backend)).with_metrics(sink);
        let accumulator = BatchAccumulator::new(batch, dispatcher.clone())?;
        Ok(Self {
            backend,
            dispatcher,
            accumulator,
            prometheus,
        })
    }

    /// Build the vLLM client, metrics and accumulator described by `config`.
    pub fn from_config(config: &ServingConfig) -> Result<Self> {
        let prometheus = if config.enable_metrics {
            Some(PrometheusMetricsSink::new()?)
        } else {
            None
        };
        let mut client = VllmClient::new(config.backend.clone())?;
        if let Some(p) = &prometheus {
            client = client.with_metrics(Arc::new(p.clone()));
        }
        Self::new(Arc::new(client), config.batch.clone(), prometheus)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health))
        .route("/api/v1/chat", post(routes::chat))
        .route("/api/v1/chat/batch", post(routes::chat_with_batch))
        .route("/api/v1/batch/chat", post(routes::batch_chat))
        .route("/api/v1/batch/stats", get(routes::batch_stats));

    if state.prometheus.is_some() {
        app = app
            .route_layer(middleware::from_fn_with_state(
                Arc::clone(&state),
                track_http,
            ))
            .route("/metrics", get(routes::metrics));
    }

    app.layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    )
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// Records every routed request except `/metrics`, labelled by route template.
async fn track_http(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    if endpoint != "/metrics" {
        if let Some(p) = &state.prometheus {
            p.record_http(
                &method,
                &endpoint,
                response.status().as_u16(),
                started.elapsed().as_secs_f64(),
            );
        }
    }
    response
}

/// Serve `state` on `listener` until `shutdown` resolves, then drain the
/// accumulator.
pub async fn serve<F>(listener: tokio::net::TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let accumulator = state.accumulator.clone();
    let app = router(state);
    if let Ok(addr) = listener.local_addr() {
        info!("LLM serving listening on http://{}", addr);
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    accumulator.shutdown().await;
    info!("Server stopped");
    Ok(())
}
