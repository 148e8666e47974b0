//! 弹性模式模块：重试、熔断器注册表与故障看门狗。
//!
//! # Resilience Primitives Module
//!
//! The mechanisms that keep one failing dependency from dragging the whole process down.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`retry`] | Bounded retries with exponential backoff for transient failures |
//! | [`circuit_breaker`] | Closed / open / half-open breaker over a rolling error window |
//! | [`registry`] | Lazily-created breakers keyed by logical destination |
//! | [`watchdog`] | Process-wide consecutive-failure escalation |
//!
//! ## Composition
//!
//! ```text
//! caller ─▶ breaker[key] ─▶ retry policy ─▶ transport
//!              │                 │
//!              │                 └─ transient errors absorbed, final error returned
//!              └─ counts only the post-retry outcome; open ⇒ fallback
//! ```
//!
//! ## Circuit Breaker
//!
//! ```rust
//! use cascade_guard::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn demo() -> cascade_guard::Result<()> {
//! let config = CircuitBreakerConfig::new()
//!     .with_error_threshold_percentage(50)
//!     .with_minimum_volume(5)
//!     .with_reset_timeout(Duration::from_secs(30));
//! let breaker = CircuitBreaker::new("inventory", config)?;
//!
//! match breaker.fire(|| async { Ok::<_, cascade_guard::Error>(42) }).await? {
//!     Some(value) => println!("got {}", value),
//!     None => println!("circuit open, using fallback"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Watchdog
//!
//! ```rust
//! use cascade_guard::resilience::watchdog::{FailureWatchdog, WatchdogConfig};
//!
//! let watchdog = FailureWatchdog::new(WatchdogConfig::new().with_terminate(false)).unwrap();
//! watchdog.handle_failure().unwrap();
//! watchdog.handle_success();
//! assert_eq!(watchdog.consecutive_failures(), 0);
//! ```

pub mod circuit_breaker;
pub mod registry;
pub mod retry;
pub mod watchdog;

pub use circuit_breaker::{
    BreakerState, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot,
};
pub use registry::BreakerRegistry;
pub use retry::{Decision, RetryPolicy};
pub use watchdog::{global_watchdog, FailureWatchdog, WatchdogConfig};
