//! # cascade-guard
//!
//! 面向出站调用与缓存访问的弹性层：重试、按键熔断、缓存降级与连续故障看门狗。
//!
//! A resilience layer that keeps failures in remote dependencies from cascading through a
//! service. Outbound HTTP calls are retried inside a per-destination circuit breaker, cache
//! access degrades silently to "absent" when the store is unhealthy, and a process-wide
//! watchdog escalates when critical operations keep failing.
//!
//! ## Core Behavior
//!
//! - **Retry inside, breaker outside**: one breaker invocation covers the whole retry
//!   budget, so the breaker only counts final outcomes
//! - **Explicit fallback**: an open circuit yields `Ok(None)` without touching the network
//! - **Keyed isolation**: every circuit key gets its own breaker, created on first use
//! - **Silent cache degradation**: cache failures are logged, never returned
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cascade_guard::ResilientClient;
//!
//! #[tokio::main]
//! async fn main() -> cascade_guard::Result<()> {
//!     let client = ResilientClient::builder()
//!         .base_address("https://api.example.com")
//!         .retries(2)
//!         .build()?;
//!
//!     match client.get("/orders/42", Some("orders")).await? {
//!         Some(resp) => println!("status {}", resp.status),
//!         None => println!("orders circuit open, serving fallback"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Resilient HTTP executor and its builder |
//! | [`resilience`] | Retry policy, circuit breaker, breaker registry, watchdog |
//! | [`cache`] | Breaker-guarded cache with local fallback store |
//! | [`transport`] | Transport trait and the reqwest implementation |
//! | [`health`] | Startup health checks |
//! | [`config`] | Settings files and environment overrides |

pub mod cache;
pub mod client;
pub mod config;
pub mod health;
pub mod resilience;
pub mod transport;

// Re-export main types for convenience
pub use cache::{CacheConfig, CacheLookup, CacheService};
pub use client::{ResilientClient, ResilientClientBuilder, ResilientClientConfig};
pub use config::Settings;
pub use health::{HealthCheck, HealthCheckConfig, HealthReport};
pub use resilience::{
    BreakerState, CircuitBreaker, CircuitBreakerConfig, FailureWatchdog, RetryPolicy,
    WatchdogConfig,
};
pub use transport::{HttpRequest, HttpResponse, Transport};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
