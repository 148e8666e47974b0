use crate::config::duration_ms;
use crate::resilience::circuit_breaker::{rate_limited_filter, CircuitBreakerConfig};
use crate::resilience::retry::{RetryDelayFn, RetryPolicy, DEFAULT_RETRY_STATUS_CODES};
use crate::{Error, ErrorContext, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

/// Options for [`ResilientClient`](super::ResilientClient).
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ResilientClientConfig {
    /// Extra attempts after the first one.
    pub retries: u32,
    pub retry_status_codes: Vec<u16>,
    /// Custom backoff; exponential with jitter when unset.
    #[serde(skip)]
    pub retry_delay: Option<RetryDelayFn>,
    /// Transport timeout. The breaker's per-call deadline is twice this.
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
    pub error_threshold_percentage: u8,
    #[serde(rename = "reset_timeout_ms", with = "duration_ms")]
    pub reset_timeout: Duration,
    pub minimum_volume: u32,
    pub base_address: Option<String>,
    pub default_headers: HashMap<String, String>,
}

impl fmt::Debug for ResilientClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientClientConfig")
            .field("retries", &self.retries)
            .field("retry_status_codes", &self.retry_status_codes)
            .field("retry_delay", &self.retry_delay.as_ref().map(|_| "custom"))
            .field("timeout", &self.timeout)
            .field("error_threshold_percentage", &self.error_threshold_percentage)
            .field("reset_timeout", &self.reset_timeout)
            .field("minimum_volume", &self.minimum_volume)
            .field("base_address", &self.base_address)
            .field("default_headers", &self.default_headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for ResilientClientConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_status_codes: DEFAULT_RETRY_STATUS_CODES.to_vec(),
            retry_delay: None,
            timeout: Duration::from_millis(5_000),
            error_threshold_percentage: 50,
            reset_timeout: Duration::from_millis(30_000),
            minimum_volume: 5,
            base_address: None,
            default_headers: HashMap::new(),
        }
    }
}

impl ResilientClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by env:
    /// - `CASCADE_GUARD_RETRIES`
    /// - `CASCADE_GUARD_TIMEOUT_MS`
    /// - `CASCADE_GUARD_ERROR_THRESHOLD`
    /// - `CASCADE_GUARD_RESET_TIMEOUT_MS`
    /// - `CASCADE_GUARD_BASE_ADDRESS`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        let parse = |name: &str| env::var(name).ok().and_then(|s| s.parse::<u64>().ok());

        if let Some(n) = parse("CASCADE_GUARD_RETRIES") {
            cfg.retries = n as u32;
        }
        if let Some(ms) = parse("CASCADE_GUARD_TIMEOUT_MS") {
            cfg.timeout = Duration::from_millis(ms);
        }
        if let Some(pct) = parse("CASCADE_GUARD_ERROR_THRESHOLD") {
            cfg.error_threshold_percentage = pct.min(u8::MAX as u64) as u8;
        }
        if let Some(ms) = parse("CASCADE_GUARD_RESET_TIMEOUT_MS") {
            cfg.reset_timeout = Duration::from_millis(ms);
        }
        if let Ok(addr) = env::var("CASCADE_GUARD_BASE_ADDRESS") {
            cfg.base_address = Some(addr);
        }
        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::configuration_with_context(
                "timeout must be greater than zero",
                ErrorContext::new()
                    .with_field_path("client.timeout_ms")
                    .with_source("client_config"),
            ));
        }
        if let Some(addr) = &self.base_address {
            url::Url::parse(addr).map_err(|e| {
                Error::configuration_with_context(
                    "base address is not an absolute URL",
                    ErrorContext::new()
                        .with_field_path("client.base_address")
                        .with_details(format!("{}: {}", addr, e))
                        .with_source("client_config"),
                )
            })?;
        }
        self.retry_policy()?;
        self.breaker_config().validate()
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        let policy = RetryPolicy::new(self.retries, self.retry_status_codes.clone())?;
        Ok(match &self.retry_delay {
            Some(delay) => policy.with_delay_fn(delay.clone()),
            None => policy,
        })
    }

    /// Breaker settings shared by every key. Rate-limit responses never count as failures.
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new()
            .with_error_threshold_percentage(self.error_threshold_percentage)
            .with_minimum_volume(self.minimum_volume)
            .with_reset_timeout(self.reset_timeout)
            .with_timeout(self.timeout.saturating_mul(2))
            .with_error_filter(rate_limited_filter())
    }
}
