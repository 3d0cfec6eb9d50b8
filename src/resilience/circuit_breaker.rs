use crate::backend::BackendError;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub consecutive_failures: u32,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive backend failures that open the breaker. 0 disables it.
    pub failure_threshold: u32,
    #[serde(rename = "cooldown_secs", with = "duration_secs")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 0,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.failure_threshold > 0
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[derive(Debug)]
struct State {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// Consecutive-failure breaker guarding the backend.
///
/// Opens for `cooldown` once `failure_threshold` calls in a row fail; the
/// first check after the cooldown closes it again.
#[derive(Debug)]
pub struct CircuitBreaker {
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(State {
                consecutive_failures: 0,
                open_until: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn check(&self) -> Result<(), BackendError> {
        let mut st = self.lock();
        if let Some(until) = st.open_until {
            let now = Instant::now();
            if now < until {
                return Err(BackendError::Unavailable(format!(
                    "circuit breaker open for another {} ms",
                    (until - now).as_millis()
                )));
            }
            st.open_until = None;
            st.consecutive_failures = 0;
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.check().is_err()
    }

    pub fn on_success(&self) {
        let mut st = self.lock();
        st.consecutive_failures = 0;
        st.open_until = None;
    }

    pub fn on_failure(&self) {
        let mut st = self.lock();
        st.consecutive_failures = st.consecutive_failures.saturating_add(1);
        if st.open_until.is_none() && st.consecutive_failures >= self.cfg.failure_threshold {
            st.open_until = Some(Instant::now() + self.cfg.cooldown);
            warn!(
                consecutive_failures = st.consecutive_failures,
                cooldown_ms = self.cfg.cooldown.as_millis() as u64,
                "Circuit breaker opened"
            );
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let now = Instant::now();
        let st = self.lock();
        CircuitBreakerSnapshot {
            failure_threshold: self.cfg.failure_threshold,
            cooldown_ms: self.cfg.cooldown.as_millis() as u64,
            consecutive_failures: st.consecutive_failures,
            open_remaining_ms: st
                .open_until
                .filter(|until| *until > now)
                .map(|until| (until - now).as_millis() as u64),
        }
    }
}
