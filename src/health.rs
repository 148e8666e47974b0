//! Startup health checks.
//!
//! Run once before serving traffic: required environment variables, reachability of HTTP
//! dependencies, and connectivity to the remote cache store. The first hard failure aborts
//! with [`Error::HealthCheck`]; soft problems (an endpoint answering with an unexpected
//! status) are reported as warnings in the [`HealthReport`].

use crate::cache::RemoteStore;
use crate::config::duration_ms;
use crate::transport::{HttpRequest, HttpTransport, Transport};
use crate::{Error, ErrorContext, Result};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Display name to URL.
    pub http_endpoints: BTreeMap<String, String>,
    pub required_env_vars: Vec<String>,
    /// Remote store address probed with connect + ping. Requires the `redis` feature.
    pub remote_address: Option<String>,
    #[serde(rename = "probe_timeout_ms", with = "duration_ms")]
    pub probe_timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            http_endpoints: BTreeMap::new(),
            required_env_vars: Vec::new(),
            remote_address: None,
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl HealthCheckConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.http_endpoints.insert(name.into(), url.into());
        self
    }

    pub fn with_required_env(mut self, var: impl Into<String>) -> Self {
        self.required_env_vars.push(var.into());
        self
    }

    pub fn with_remote_address(mut self, address: impl Into<String>) -> Self {
        self.remote_address = Some(address.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (name, url) in &self.http_endpoints {
            url::Url::parse(url).map_err(|e| {
                Error::configuration_with_context(
                    format!("health endpoint '{}' is not a valid URL", name),
                    ErrorContext::new()
                        .with_field_path(format!("health.http_endpoints.{}", name))
                        .with_details(format!("{}: {}", url, e))
                        .with_source("health_check"),
                )
            })?;
        }
        if self.probe_timeout.is_zero() {
            return Err(Error::configuration_with_context(
                "probe timeout must be greater than zero",
                ErrorContext::new()
                    .with_field_path("health.probe_timeout_ms")
                    .with_source("health_check"),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Passed,
    Warning,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub name: String,
    pub status: ProbeStatus,
    pub detail: Option<String>,
}

impl ProbeResult {
    fn passed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ProbeStatus::Passed,
            detail: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthReport {
    pub probes: Vec<ProbeResult>,
}

impl HealthReport {
    pub fn warnings(&self) -> impl Iterator<Item = &ProbeResult> {
        self.probes
            .iter()
            .filter(|p| p.status == ProbeStatus::Warning)
    }

    pub fn is_clean(&self) -> bool {
        self.warnings().next().is_none()
    }
}

/// `HEAD` answers that prove the host is reachable even if the path or method is not served.
fn is_reachable(status: u16) -> bool {
    (200..400).contains(&status) || status == 404 || status == 405
}

pub struct HealthCheck {
    config: HealthCheckConfig,
    transport: Arc<dyn Transport>,
    store: Option<Arc<dyn RemoteStore>>,
}

impl HealthCheck {
    /// Probes over a dedicated HTTP transport; a configured remote address gets its own
    /// store connection.
    pub fn new(config: HealthCheckConfig) -> Result<Self> {
        config.validate()?;
        let transport = Arc::new(HttpTransport::new(config.probe_timeout)?);
        let store = Self::store_for(&config)?;
        Ok(Self {
            config,
            transport,
            store,
        })
    }

    #[cfg(feature = "redis")]
    fn store_for(config: &HealthCheckConfig) -> Result<Option<Arc<dyn RemoteStore>>> {
        match &config.remote_address {
            Some(addr) => Ok(Some(Arc::new(crate::cache::RedisStore::new(addr)?))),
            None => Ok(None),
        }
    }

    #[cfg(not(feature = "redis"))]
    fn store_for(config: &HealthCheckConfig) -> Result<Option<Arc<dyn RemoteStore>>> {
        match &config.remote_address {
            Some(addr) => Err(Error::configuration_with_context(
                "remote store probe requires the `redis` feature",
                ErrorContext::new()
                    .with_field_path("health.remote_address")
                    .with_details(addr.clone())
                    .with_source("health_check"),
            )),
            None => Ok(None),
        }
    }

    /// Probes over an injected transport and no remote store.
    pub fn with_transport(
        config: HealthCheckConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            transport,
            store: None,
        })
    }

    /// Probe `store` instead of any configured remote address. The probe connects and
    /// closes it, so pass a store that is not shared with a live cache.
    pub fn with_remote_store(mut self, store: Arc<dyn RemoteStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Run every check in order: env vars, HTTP endpoints, remote store.
    pub async fn run_all(&self) -> Result<HealthReport> {
        info!("running startup health checks");
        let mut report = HealthReport::default();
        report.probes.extend(self.check_env_vars()?);
        report.probes.extend(self.check_http_endpoints().await?);
        report.probes.extend(self.check_remote_store().await?);
        info!(
            probes = report.probes.len(),
            warnings = report.warnings().count(),
            "health checks passed"
        );
        Ok(report)
    }

    pub fn check_env_vars(&self) -> Result<Vec<ProbeResult>> {
        let missing: Vec<&str> = self
            .config
            .required_env_vars
            .iter()
            .filter(|k| std::env::var(k.as_str()).map(|v| v.is_empty()).unwrap_or(true))
            .map(String::as_str)
            .collect();

        if !missing.is_empty() {
            let message = format!(
                "missing required environment variables: {}",
                missing.join(", ")
            );
            error!(missing = ?missing, "health check failed");
            return Err(Error::HealthCheck { message });
        }
        Ok(self
            .config
            .required_env_vars
            .iter()
            .map(|k| ProbeResult::passed(format!("env:{}", k)))
            .collect())
    }

    /// `HEAD` every endpoint concurrently. A network error fails the check; unexpected
    /// statuses only warn.
    pub async fn check_http_endpoints(&self) -> Result<Vec<ProbeResult>> {
        let probes = self.config.http_endpoints.iter().map(|(name, url)| {
            let request = HttpRequest::new(Method::HEAD, url.as_str())
                .with_timeout(self.config.probe_timeout);
            let transport = Arc::clone(&self.transport);
            async move { (name, url, transport.send(&request).await) }
        });

        let mut results = Vec::with_capacity(self.config.http_endpoints.len());
        for (name, url, outcome) in futures::future::join_all(probes).await {
            match outcome {
                Ok(resp) if is_reachable(resp.status) => {
                    info!(
                        endpoint = name.as_str(),
                        http_status = resp.status,
                        "endpoint reachable"
                    );
                    results.push(ProbeResult::passed(name.clone()));
                }
                Ok(resp) => {
                    warn!(
                        endpoint = name.as_str(),
                        http_status = resp.status,
                        "endpoint returned unexpected status"
                    );
                    results.push(ProbeResult {
                        name: name.clone(),
                        status: ProbeStatus::Warning,
                        detail: Some(format!("status {}", resp.status)),
                    });
                }
                Err(e) => {
                    error!(endpoint = name.as_str(), error = %e, "endpoint connection error");
                    return Err(Error::HealthCheck {
                        message: format!("could not connect to {} at {}", name, url),
                    });
                }
            }
        }
        Ok(results)
    }

    pub async fn check_remote_store(&self) -> Result<Vec<ProbeResult>> {
        let store = match &self.store {
            Some(s) => s,
            None => return Ok(Vec::new()),
        };

        let probe = async {
            store.connect().await?;
            store.ping().await?;
            store.close().await?;
            Ok::<(), Error>(())
        };
        match probe.await {
            Ok(()) => {
                info!(backend = store.name(), "remote store reachable");
                Ok(vec![ProbeResult::passed(format!("store:{}", store.name()))])
            }
            Err(e) => {
                error!(backend = store.name(), error = %e, "remote store connection error");
                Err(Error::HealthCheck {
                    message: format!("could not connect to remote store ({})", store.name()),
                })
            }
        }
    }
}
