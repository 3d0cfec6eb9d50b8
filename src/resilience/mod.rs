//! 弹性模块：为后端调用提供熔断保护。
//!
//! # Resilience Module
//!
//! The backend client consults a [`CircuitBreaker`](circuit_breaker::CircuitBreaker)
//! once per batch through `CompletionBackend::preflight`. While the breaker is
//! open the whole batch fails fast instead of issuing calls that are known to
//! fail.
//!
//! - **Closed**: calls pass through, consecutive failures are counted
//! - **Open**: threshold reached, preflight fails until the cooldown elapses
//!
//! ```rust
//! use llm_serving::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::new()
//!         .with_failure_threshold(2)
//!         .with_cooldown(Duration::from_secs(30)),
//! );
//! breaker.on_failure();
//! breaker.on_failure();
//! assert!(breaker.check().is_err());
//! ```

pub mod circuit_breaker;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};
