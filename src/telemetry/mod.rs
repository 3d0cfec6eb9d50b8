//! 遥测模块：批处理与后端调用的指标上报接口。
//!
//! Telemetry Module.
//!
//! The batching core reports what it did through a [`MetricsSink`]. Sinks are
//! synchronous and infallible: recording a metric must never block a flush
//! cycle or surface an error back into it.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`MetricsSink`] | Trait for metric destinations |
//! | [`NoopMetricsSink`] | Default no-op sink |
//! | [`InMemoryMetricsSink`] | Records events in memory, for tests |
//! | [`CompositeMetricsSink`] | Fans out to several sinks |
//! | [`PrometheusMetricsSink`] | Prometheus counters and histograms |

pub mod prometheus;

pub use self::prometheus::PrometheusMetricsSink;

use std::sync::{Arc, Mutex, PoisonError};

/// Destination for batch, backend and HTTP metrics.
pub trait MetricsSink: Send + Sync {
    /// One dispatched batch, successful or not.
    fn record_batch(&self, batch_size: usize, duration_secs: f64);

    /// One backend call.
    fn record_backend_call(&self, _success: bool, _latency_secs: f64) {}

    /// One served HTTP request.
    fn record_http(&self, _method: &str, _endpoint: &str, _status: u16, _duration_secs: f64) {}
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record_batch(&self, _batch_size: usize, _duration_secs: f64) {}
}

pub fn noop_sink() -> Arc<dyn MetricsSink> {
    Arc::new(NoopMetricsSink)
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    Batch {
        size: usize,
        duration_secs: f64,
    },
    BackendCall {
        success: bool,
        latency_secs: f64,
    },
    Http {
        method: String,
        endpoint: String,
        status: u16,
    },
}

/// In-memory sink for testing.
pub struct InMemoryMetricsSink {
    events: Mutex<Vec<MetricEvent>>,
    max_events: usize,
}

impl InMemoryMetricsSink {
    pub fn new(max: usize) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            max_events: max,
        }
    }

    fn push(&self, event: MetricEvent) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.push(event);
        if events.len() > self.max_events {
            events.remove(0);
        }
    }

    pub fn events(&self) -> Vec<MetricEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sizes of recorded batches, in dispatch order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MetricEvent::Batch { size, .. } => Some(size),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryMetricsSink {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn record_batch(&self, batch_size: usize, duration_secs: f64) {
        self.push(MetricEvent::Batch {
            size: batch_size,
            duration_secs,
        });
    }

    fn record_backend_call(&self, success: bool, latency_secs: f64) {
        self.push(MetricEvent::BackendCall {
            success,
            latency_secs,
        });
    }

    fn record_http(&self, method: &str, endpoint: &str, status: u16, _duration_secs: f64) {
        self.push(MetricEvent::Http {
            method: method.to_string(),
            endpoint: endpoint.to_string(),
            status,
        });
    }
}

/// Composite sink for multiple destinations.
#[derive(Default)]
pub struct CompositeMetricsSink {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl CompositeMetricsSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn add_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl MetricsSink for CompositeMetricsSink {
    fn record_batch(&self, batch_size: usize, duration_secs: f64) {
        for s in &self.sinks {
            s.record_batch(batch_size, duration_secs);
        }
    }

    fn record_backend_call(&self, success: bool, latency_secs: f64) {
        for s in &self.sinks {
            s.record_backend_call(success, latency_secs);
        }
    }

    fn record_http(&self, method: &str, endpoint: &str, status: u16, duration_secs: f64) {
        for s in &self.sinks {
            s.record_http(method, endpoint, status, duration_secs);
        }
    }
}
