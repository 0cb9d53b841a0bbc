//! Health probe implementations.

use crate::metrics::RegistryMetrics;
use crate::types::{Registration, Status};
use async_trait::async_trait;
use common::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Longest response body excerpt written to the log for a failed probe.
const BODY_LOG_LIMIT: usize = 256;

/// Health probe trait
///
/// A probe performs exactly one check and folds every failure into
/// [`Status::Down`]; retrying is left to the caller's polling cadence.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe the registration's health endpoint once
    async fn probe(&self, registration: &Registration) -> Status;

    /// Get the name of this probe
    fn name(&self) -> &str;
}

/// Supported probe schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeScheme {
    Http,
    Https,
}

impl ProbeScheme {
    /// Parse a `healthCheck.type` value, case-insensitively.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(ProbeScheme::Http),
            "https" => Ok(ProbeScheme::Https),
            other => Err(Error::contract_invalid(format!(
                "unsupported health check type '{}'",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeScheme::Http => "http",
            ProbeScheme::Https => "https",
        }
    }
}

/// Build the probe URL `{type}://{host}:{port}{path}`.
pub fn probe_url(registration: &Registration) -> Result<String> {
    let scheme = ProbeScheme::parse(&registration.health_check.scheme)?;
    Ok(format!(
        "{}://{}:{}{}",
        scheme.as_str(),
        registration.host,
        registration.port,
        registration.health_check.path
    ))
}

/// Classify an HTTP status code: `[200, 300)` is up, everything else down.
pub fn classify(status_code: u16) -> Status {
    if (200..300).contains(&status_code) {
        Status::Up
    } else {
        Status::Down
    }
}

fn excerpt(body: &str) -> &str {
    match body.char_indices().nth(BODY_LOG_LIMIT) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// HTTP/HTTPS health probe
pub struct HttpProbe {
    client: reqwest::Client,
    timeout_duration: Duration,
    metrics: Option<Arc<RegistryMetrics>>,
}

impl HttpProbe {
    /// Create a new HTTP probe with the given per-request timeout
    pub fn new(timeout_duration: Duration) -> Result<Self> {
        // Redirects are not followed: any 3xx answer classifies as down.
        let client = reqwest::Client::builder()
            .timeout(timeout_duration)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            timeout_duration,
            metrics: None,
        })
    }

    /// Record every probe outcome in `metrics`
    pub fn with_metrics(mut self, metrics: Arc<RegistryMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout_duration
    }

    async fn get(&self, registration: &Registration) -> Status {
        let url = match probe_url(registration) {
            Ok(url) => url,
            Err(e) => {
                warn!(service_id = %registration.service_id, error = %e, "Cannot build health check URL");
                return Status::Down;
            }
        };

        // The response owns the connection; it is released when dropped at the
        // end of whichever arm consumes it.
        match self
            .client
            .get(&url)
            .timeout(self.timeout_duration)
            .send()
            .await
        {
            Ok(response) => {
                let code = response.status().as_u16();
                let status = classify(code);

                if status == Status::Up {
                    debug!(service_id = %registration.service_id, %url, status = code, "Health check passed");
                } else {
                    match response.text().await {
                        Ok(body) => warn!(
                            service_id = %registration.service_id,
                            %url,
                            status = code,
                            body = excerpt(&body),
                            "Health check failed"
                        ),
                        Err(e) => warn!(
                            service_id = %registration.service_id,
                            %url,
                            status = code,
                            error = %e,
                            "Health check failed, response body unreadable"
                        ),
                    }
                }

                status
            }
            Err(e) => {
                warn!(service_id = %registration.service_id, %url, error = %e, "Health check request failed");
                Status::Down
            }
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, registration: &Registration) -> Status {
        let start = Instant::now();
        let status = self.get(registration).await;

        if let Some(ref m) = self.metrics {
            m.record_probe(status, start.elapsed());
        }

        status
    }

    fn name(&self) -> &str {
        "http"
    }
}
