use super::config::ResilientClientConfig;
use super::core::ResilientClient;
use crate::resilience::registry::BreakerRegistry;
use crate::resilience::retry::RetryDelayFn;
use crate::transport::{HttpTransport, Transport};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating clients with custom configuration.
pub struct ResilientClientBuilder {
    config: ResilientClientConfig,
    transport: Option<Arc<dyn Transport>>,
}

impl ResilientClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ResilientClientConfig::default(),
            transport: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ResilientClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.config.retries = retries;
        self
    }

    pub fn retry_status_codes(mut self, codes: Vec<u16>) -> Self {
        self.config.retry_status_codes = codes;
        self
    }

    /// Custom backoff; receives the 1-based retry number.
    pub fn retry_delay(mut self, delay: RetryDelayFn) -> Self {
        self.config.retry_delay = Some(delay);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn error_threshold_percentage(mut self, pct: u8) -> Self {
        self.config.error_threshold_percentage = pct;
        self
    }

    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.config.reset_timeout = timeout;
        self
    }

    pub fn minimum_volume(mut self, volume: u32) -> Self {
        self.config.minimum_volume = volume;
        self
    }

    pub fn base_address(mut self, address: impl Into<String>) -> Self {
        self.config.base_address = Some(address.into());
        self
    }

    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.insert(name.into(), value.into());
        self
    }

    /// Inject a transport. Defaults to [`HttpTransport`] with the configured timeout.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the client. Invalid configuration fails here, never at call time.
    pub fn build(self) -> Result<ResilientClient> {
        self.config.validate()?;

        let transport = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::new(self.config.timeout)?),
        };
        let retry = Arc::new(self.config.retry_policy()?);
        let breakers = BreakerRegistry::new(self.config.breaker_config())?;

        tracing::info!(
            transport = transport.name(),
            retries = self.config.retries,
            timeout_ms = self.config.timeout.as_millis() as u64,
            error_threshold_percentage = self.config.error_threshold_percentage,
            reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
            "resilient client configured"
        );

        Ok(ResilientClient::from_parts(
            self.config,
            transport,
            retry,
            breakers,
        ))
    }
}

impl Default for ResilientClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
