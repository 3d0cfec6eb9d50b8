//! llm-serving: batching HTTP front end for an OpenAI-compatible vLLM server.
//!
//! Configuration comes from built-in defaults, the YAML file named by
//! `LLM_SERVING_CONFIG`, and `VLLM_*` / `BATCH_*` / `API_*` environment
//! variables, in that order.

use llm_serving::backend::CompletionBackend;
use llm_serving::config::ServingConfig;
use llm_serving::server::{self, AppState};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("llm_serving=info,tower_http=info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let config = ServingConfig::load()?;
    info!(
        vllm_url = %config.backend.base_url,
        model = %config.backend.model,
        max_batch_size = config.batch.max_batch_size,
        flush_timeout_ms = config.batch.flush_timeout.as_millis() as u64,
        metrics = config.enable_metrics,
        "Starting llm-serving v{}",
        env!("CARGO_PKG_VERSION")
    );

    let state = Arc::new(AppState::from_config(&config)?);
    if state.backend.health_check().await {
        info!("vLLM server connected at {}", config.backend.base_url);
    } else {
        warn!(
            "vLLM server not available at {}; serving anyway",
            config.backend.base_url
        );
    }

    let listener = tokio::net::TcpListener::bind(config.server.bind_addr()).await?;
    server::serve(listener, state, shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining queued requests");
}
