//! Aggregated settings loaded from YAML or JSON.
//!
//! Durations are written in milliseconds (`timeout_ms`, `reset_timeout_ms`); every section
//! and field is optional and falls back to its default.
//!
//! ```yaml
//! client:
//!   retries: 2
//!   timeout_ms: 1500
//!   base_address: https://api.example.com
//! cache:
//!   default_ttl_secs: 120
//!   breaker:
//!     reset_timeout_ms: 5000
//! watchdog:
//!   threshold: 5
//!   terminate_process_on_threshold: false
//! health:
//!   required_env_vars: [API_KEY]
//!   http_endpoints:
//!     upstream: https://api.example.com/health
//! ```

use crate::cache::CacheConfig;
use crate::client::ResilientClientConfig;
use crate::health::HealthCheckConfig;
use crate::resilience::WatchdogConfig;
use crate::{Error, ErrorContext, Result};
use serde::Deserialize;
use std::path::Path;

/// Serde adapter for `Duration` fields stored as integer milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub client: ResilientClientConfig,
    pub cache: CacheConfig,
    pub watchdog: WatchdogConfig,
    pub health: HealthCheckConfig,
}

impl Settings {
    /// Defaults overridden by the `CASCADE_GUARD_*` environment variables of each section.
    pub fn from_env() -> Self {
        Self {
            client: ResilientClientConfig::from_env(),
            cache: CacheConfig::from_env(),
            watchdog: WatchdogConfig::from_env(),
            health: HealthCheckConfig::default(),
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(content).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid YAML settings: {}", e),
                ErrorContext::new().with_source("settings"),
            )
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(content).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid JSON settings: {}", e),
                ErrorContext::new().with_source("settings"),
            )
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::configuration_with_context(
                format!("failed to read settings: {}", e),
                ErrorContext::new()
                    .with_details(path.to_string_lossy().to_string())
                    .with_source("settings"),
            )
        })?;

        let is_json = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.client.validate()?;
        self.cache.validate()?;
        self.watchdog.validate()?;
        self.health.validate()
    }
}
