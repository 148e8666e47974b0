use super::builder::ResilientClientBuilder;
use super::config::ResilientClientConfig;
use crate::resilience::circuit_breaker::CircuitBreakerSnapshot;
use crate::resilience::registry::BreakerRegistry;
use crate::resilience::retry::RetryPolicy;
use crate::transport::{HttpRequest, HttpResponse, Transport};
use crate::{Error, ErrorContext, Result};
use reqwest::Method;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Circuit key used when a call does not name one.
pub const DEFAULT_CIRCUIT_KEY: &str = "default";

const REQUEST_ID_HEADER: &str = "x-request-id";

/// HTTP client that retries transient failures and isolates destinations behind
/// per-key circuit breakers.
///
/// Every call returns:
/// - `Ok(Some(response))` for a 2xx response,
/// - `Ok(None)` when the circuit for the key is open (the fallback),
/// - `Err(_)` for the final failure once retries are exhausted.
pub struct ResilientClient {
    config: ResilientClientConfig,
    transport: Arc<dyn Transport>,
    retry: Arc<RetryPolicy>,
    breakers: BreakerRegistry,
}

impl ResilientClient {
    /// Create a client over the default HTTP transport.
    pub fn new(config: ResilientClientConfig) -> Result<Self> {
        ResilientClientBuilder::new().config(config).build()
    }

    pub fn builder() -> ResilientClientBuilder {
        ResilientClientBuilder::new()
    }

    pub(crate) fn from_parts(
        config: ResilientClientConfig,
        transport: Arc<dyn Transport>,
        retry: Arc<RetryPolicy>,
        breakers: BreakerRegistry,
    ) -> Self {
        Self {
            config,
            transport,
            retry,
            breakers,
        }
    }

    pub fn config(&self) -> &ResilientClientConfig {
        &self.config
    }

    /// Send `request` through the breaker for `circuit_key`.
    ///
    /// Retries happen inside a single breaker invocation, so the breaker only sees the
    /// outcome after the retry budget is spent.
    pub async fn request(
        &self,
        request: HttpRequest,
        circuit_key: Option<&str>,
    ) -> Result<Option<HttpResponse>> {
        let key = circuit_key.unwrap_or(DEFAULT_CIRCUIT_KEY);
        let prepared = self.prepare(request)?;
        let breaker = self.breakers.get_or_create(key);

        let transport = Arc::clone(&self.transport);
        let retry = Arc::clone(&self.retry);
        let circuit = key.to_string();

        breaker
            .fire(move || async move {
                let method = prepared.method.clone();
                retry
                    .execute(&method, |attempt| {
                        send_once(transport.as_ref(), &prepared, &circuit, attempt)
                    })
                    .await
            })
            .await
    }

    pub async fn get(&self, url: &str, circuit_key: Option<&str>) -> Result<Option<HttpResponse>> {
        self.request(HttpRequest::new(Method::GET, url), circuit_key)
            .await
    }

    pub async fn post(
        &self,
        url: &str,
        body: Option<serde_json::Value>,
        circuit_key: Option<&str>,
    ) -> Result<Option<HttpResponse>> {
        self.request(with_body(HttpRequest::new(Method::POST, url), body), circuit_key)
            .await
    }

    pub async fn put(
        &self,
        url: &str,
        body: Option<serde_json::Value>,
        circuit_key: Option<&str>,
    ) -> Result<Option<HttpResponse>> {
        self.request(with_body(HttpRequest::new(Method::PUT, url), body), circuit_key)
            .await
    }

    pub async fn delete(
        &self,
        url: &str,
        circuit_key: Option<&str>,
    ) -> Result<Option<HttpResponse>> {
        self.request(HttpRequest::new(Method::DELETE, url), circuit_key)
            .await
    }

    /// Breaker status for `key`, or `None` if no call has used it yet.
    pub fn circuit_status(&self, circuit_key: Option<&str>) -> Option<CircuitBreakerSnapshot> {
        self.breakers
            .status(circuit_key.unwrap_or(DEFAULT_CIRCUIT_KEY))
    }

    /// Force the breaker for `key` closed. Returns `false` if the key was never used.
    pub fn reset_circuit(&self, circuit_key: Option<&str>) -> bool {
        self.breakers
            .reset(circuit_key.unwrap_or(DEFAULT_CIRCUIT_KEY))
    }

    pub fn circuit_keys(&self) -> Vec<String> {
        self.breakers.keys()
    }

    /// Resolve the URL against the base address and merge default headers under the
    /// request's own.
    fn prepare(&self, mut request: HttpRequest) -> Result<HttpRequest> {
        request.url = self.resolve_url(&request.url)?;

        for (k, v) in &self.config.default_headers {
            let overridden = request
                .headers
                .keys()
                .any(|existing| existing.eq_ignore_ascii_case(k));
            if !overridden {
                request.headers.insert(k.clone(), v.clone());
            }
        }

        let has_request_id = request
            .headers
            .keys()
            .any(|k| k.eq_ignore_ascii_case(REQUEST_ID_HEADER));
        if !has_request_id {
            // Our own correlation id. Servers may ignore it; logs use it for linkage.
            request
                .headers
                .insert(REQUEST_ID_HEADER.to_string(), Uuid::new_v4().to_string());
        }
        Ok(request)
    }

    fn resolve_url(&self, url: &str) -> Result<String> {
        if url::Url::parse(url).is_ok() {
            return Ok(url.to_string());
        }
        match &self.config.base_address {
            Some(base) => Ok(join_url(base, url)),
            None => Err(Error::runtime_with_context(
                "relative URL requires a base address",
                ErrorContext::new()
                    .with_field_path("request.url")
                    .with_details(url.to_string())
                    .with_source("resilient_client"),
            )),
        }
    }
}

fn with_body(request: HttpRequest, body: Option<serde_json::Value>) -> HttpRequest {
    match body {
        Some(b) => request.with_json(b),
        None => request,
    }
}

fn join_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// One transport attempt; non-2xx responses become [`Error::Remote`].
async fn send_once(
    transport: &dyn Transport,
    request: &HttpRequest,
    circuit: &str,
    attempt: u32,
) -> Result<HttpResponse> {
    let start = Instant::now();
    let response = transport.send(request).await?;

    if response.is_success() {
        debug!(
            circuit,
            method = %request.method,
            url = request.url.as_str(),
            http_status = response.status,
            attempt,
            duration_ms = start.elapsed().as_millis() as u64,
            "request succeeded"
        );
        return Ok(response);
    }

    info!(
        circuit,
        method = %request.method,
        url = request.url.as_str(),
        http_status = response.status,
        attempt,
        duration_ms = start.elapsed().as_millis() as u64,
        request_id = request.headers.get(REQUEST_ID_HEADER).map(String::as_str).unwrap_or(""),
        "request failed"
    );

    Err(Error::Remote {
        status: response.status,
        message: response.text(),
    })
}
