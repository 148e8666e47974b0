//! Resilient HTTP client: retry inside, keyed circuit breaker outside.
//!
//! Implementation details are split into submodules under `src/client/`.

pub mod builder;
pub mod config;
pub mod core;

pub use builder::ResilientClientBuilder;
pub use config::ResilientClientConfig;
pub use core::{ResilientClient, DEFAULT_CIRCUIT_KEY};
