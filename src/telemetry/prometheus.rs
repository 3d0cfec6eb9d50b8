//! Prometheus metrics sink.

use super::MetricsSink;
use crate::Result;
use ::prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};

/// Counters and histograms on a private [`Registry`].
#[derive(Clone)]
pub struct PrometheusMetricsSink {
    registry: Registry,
    batch_requests_total: Counter,
    batch_size: Histogram,
    batch_duration_seconds: Histogram,
    vllm_requests_total: CounterVec,
    vllm_latency_seconds: Histogram,
    http_requests_total: CounterVec,
    http_request_duration_seconds: HistogramVec,
}

impl PrometheusMetricsSink {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let batch_requests_total = Counter::with_opts(Opts::new(
            "batch_requests_total",
            "Total batch requests processed",
        ))?;
        let batch_size = Histogram::with_opts(
            HistogramOpts::new("batch_size_total", "Batch size distribution")
                .buckets(vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0]),
        )?;
        let batch_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "batch_duration_seconds",
                "Batch processing duration in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        )?;
        let vllm_requests_total = CounterVec::new(
            Opts::new("vllm_requests_total", "Total vLLM requests"),
            &["status"],
        )?;
        let vllm_latency_seconds = Histogram::with_opts(
            HistogramOpts::new("vllm_latency_seconds", "vLLM request latency in seconds")
                .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        )?;
        let http_requests_total = CounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests"),
            &["method", "endpoint", "status"],
        )?;
        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["method", "endpoint"],
        )?;

        registry.register(Box::new(batch_requests_total.clone()))?;
        registry.register(Box::new(batch_size.clone()))?;
        registry.register(Box::new(batch_duration_seconds.clone()))?;
        registry.register(Box::new(vllm_requests_total.clone()))?;
        registry.register(Box::new(vllm_latency_seconds.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            batch_requests_total,
            batch_size,
            batch_duration_seconds,
            vllm_requests_total,
            vllm_latency_seconds,
            http_requests_total,
            http_request_duration_seconds,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition format for `/metrics`.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| {
            crate::Error::runtime_with_context(
                "metrics output is not UTF-8",
                crate::ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("prometheus"),
            )
        })
    }

    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }
}

impl MetricsSink for PrometheusMetricsSink {
    fn record_batch(&self, batch_size: usize, duration_secs: f64) {
        self.batch_requests_total.inc();
        self.batch_size.observe(batch_size as f64);
        self.batch_duration_seconds.observe(duration_secs);
    }

    fn record_backend_call(&self, success: bool, latency_secs: f64) {
        let status = if success { "success" } else { "error" };
        self.vllm_requests_total.with_label_values(&[status]).inc();
        self.vllm_latency_seconds.observe(latency_secs);
    }

    fn record_http(&self, method: &str, endpoint: &str, status: u16, duration_secs: f64) {
        let status = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, endpoint, status.as_str()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, endpoint])
            .observe(duration_secs);
    }
}
