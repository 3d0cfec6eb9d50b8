//! Service configuration.
//!
//! Values are layered: built-in defaults, then an optional YAML file named by
//! `LLM_SERVING_CONFIG`, then environment variables.

use crate::batch::BatchConfig;
use crate::transport::BackendConfig;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Environment variable holding the optional YAML config path.
pub const CONFIG_PATH_ENV: &str = "LLM_SERVING_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    pub backend: BackendConfig,
    pub batch: BatchConfig,
    pub server: ServerConfig,
    pub enable_metrics: bool,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            batch: BatchConfig::default(),
            server: ServerConfig::default(),
            enable_metrics: true,
        }
    }
}

impl ServingConfig {
    /// Defaults, then the YAML file from `LLM_SERVING_CONFIG` if set, then the
    /// process environment. The result is validated.
    pub fn load() -> Result<Self> {
        let mut config = match env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_yaml_file(path.trim())?,
            _ => Self::default(),
        };
        config.apply_env_from(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading configuration file");
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Overlay environment overrides. `lookup` maps a variable name to its
    /// value, which keeps this testable without touching the process env.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("VLLM_BASE_URL") {
            self.backend.base_url = v;
        }
        if let Some(v) = lookup("VLLM_API_KEY") {
            self.backend.api_key = Some(v).filter(|k| !k.is_empty());
        }
        if let Some(v) = get("VLLM_MODEL") {
            self.backend.model = v;
        }
        if let Some(v) = get("VLLM_TIMEOUT_SECS") {
            self.backend.timeout = Duration::from_secs(parse_var("VLLM_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("VLLM_POOL_MAX_IDLE_PER_HOST") {
            self.backend.pool_max_idle_per_host = parse_var("VLLM_POOL_MAX_IDLE_PER_HOST", &v)?;
        }
        if let Some(v) = get("VLLM_BREAKER_THRESHOLD") {
            self.backend.circuit_breaker.failure_threshold =
                parse_var("VLLM_BREAKER_THRESHOLD", &v)?;
        }
        if let Some(v) = get("VLLM_BREAKER_COOLDOWN_SECS") {
            self.backend.circuit_breaker.cooldown =
                Duration::from_secs(parse_var("VLLM_BREAKER_COOLDOWN_SECS", &v)?);
        }
        if let Some(v) = get("BATCH_MAX_SIZE") {
            self.batch.max_batch_size = parse_var("BATCH_MAX_SIZE", &v)?;
        }
        if let Some(v) = get("BATCH_TIMEOUT_MS") {
            self.batch.flush_timeout = Duration::from_millis(parse_var("BATCH_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = get("BATCH_MAX_QUEUE_DEPTH") {
            self.batch.max_queue_depth = parse_var("BATCH_MAX_QUEUE_DEPTH", &v)?;
        }
        if let Some(v) = get("API_HOST") {
            self.server.host = v;
        }
        if let Some(v) = get("API_PORT") {
            self.server.port = parse_var("API_PORT", &v)?;
        }
        if let Some(v) = get("ENABLE_METRICS") {
            self.enable_metrics = parse_bool("ENABLE_METRICS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.batch.validate()?;
        Url::parse(&self.backend.base_url).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid backend base URL '{}'", self.backend.base_url),
                ErrorContext::new()
                    .with_field_path("backend.base_url")
                    .with_details(e.to_string()),
            )
        })?;
        if self.backend.model.trim().is_empty() {
            return Err(Error::configuration_with_context(
                "backend model must not be empty",
                ErrorContext::new().with_field_path("backend.model"),
            ));
        }
        Ok(())
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| {
        Error::configuration_with_context(
            format!("invalid value for {}", key),
            ErrorContext::new()
                .with_field_path(key)
                .with_details(format!("'{}': {}", value, e)),
        )
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::configuration_with_context(
            format!("invalid value for {}", key),
            ErrorContext::new()
                .with_field_path(key)
                .with_details(format!("'{}' is not a boolean", value)),
        )),
    }
}
