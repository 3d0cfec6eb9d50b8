//! Batch statistics tracker.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Point-in-time copy of the accumulator counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Requests accepted by `submit`.
    pub total_requests: u64,
    /// Batches dispatched, failed ones included.
    pub total_batches: u64,
    pub avg_batch_size: f64,
    /// Requests whose outcome was an error.
    pub failed_requests: u64,
    /// Submissions refused because the queue was full.
    pub rejected_requests: u64,
    pub cancelled_requests: u64,
    pub avg_batch_duration_ms: f64,
    pub last_batch_duration_ms: Option<f64>,
}

/// Thread-safe counters behind one lock, so a snapshot never mixes a new
/// batch count with a stale average.
#[derive(Debug, Default)]
pub struct StatsTracker {
    inner: Mutex<BatchStats>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BatchStats> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_request(&self) {
        self.lock().total_requests += 1;
    }

    pub fn record_rejected(&self) {
        self.lock().rejected_requests += 1;
    }

    pub fn record_cancelled(&self) {
        self.lock().cancelled_requests += 1;
    }

    /// Fold one dispatched batch into the running means.
    pub fn record_batch(&self, batch_size: usize, duration: Duration, failures: usize) {
        let duration_ms = duration.as_secs_f64() * 1000.0;
        let mut s = self.lock();
        s.total_batches += 1;
        let n = s.total_batches as f64;
        s.avg_batch_size += (batch_size as f64 - s.avg_batch_size) / n;
        s.avg_batch_duration_ms += (duration_ms - s.avg_batch_duration_ms) / n;
        s.last_batch_duration_ms = Some(duration_ms);
        s.failed_requests += failures as u64;
    }

    pub fn snapshot(&self) -> BatchStats {
        self.lock().clone()
    }
}
