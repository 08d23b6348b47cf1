//! HTTP/HTTPS probe

use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use reqwest::header::CONTENT_TYPE;
use tracing::{error, instrument, trace};

use crate::config::ServiceConfiguration;
use crate::model::{HealthCheckRecord, Status};

use super::Prober;

/// Probes a service by issuing one HTTP request and comparing the status code
#[derive(Debug, Clone, Default)]
pub struct HttpProber {
    /// Shared between probes for connection reuse
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build_request(
        &self,
        config: &ServiceConfiguration,
    ) -> Result<reqwest::RequestBuilder, String> {
        let method = Method::from_bytes(config.method.to_uppercase().as_bytes())
            .map_err(|e| format!("invalid method {}: {}", config.method, e))?;

        let mut request = self
            .client
            .request(method.clone(), &config.target)
            .timeout(config.timeout());

        let mut content_type = None;
        if let Some(headers) = &config.headers {
            for (name, value) in headers {
                // only applies to the body
                if name.eq_ignore_ascii_case("content-type") {
                    content_type = Some(value.as_str());
                    continue;
                }
                request = request.header(name.as_str(), value.as_str());
            }
        }

        let body = config.request_body.as_deref().filter(|b| !b.is_empty());
        if let Some(body) = body.filter(|_| method == Method::POST || method == Method::PUT) {
            request = request
                .header(CONTENT_TYPE, content_type.unwrap_or("application/json"))
                .body(body.to_string());
        }

        Ok(request)
    }
}

#[async_trait]
impl Prober for HttpProber {
    #[instrument(skip(self, config), fields(service = %config.id, target = %config.target))]
    async fn probe(&self, config: &ServiceConfiguration) -> HealthCheckRecord {
        let request = match self.build_request(config) {
            Ok(request) => request,
            Err(e) => {
                error!("failed to build request: {}", e);
                return HealthCheckRecord::critical(
                    Utc::now(),
                    std::time::Duration::ZERO,
                    format!("HTTP request failed: {e}"),
                );
            }
        };

        let start = Instant::now();
        let result = request.send().await;
        let response_time = start.elapsed();

        let (status, error_message) = match result {
            Ok(response) => {
                let code = response.status();
                if code.as_u16() == config.expected_response_code {
                    trace!(status = code.as_u16(), ?response_time, "service healthy");
                    (Status::Healthy, None)
                } else {
                    let body = response.text().await.unwrap_or_default();
                    (
                        Status::Critical,
                        Some(format!("Unexpected status code: {code}. Response: {body}")),
                    )
                }
            }
            Err(e) if e.is_timeout() => {
                error!("request timed out: {}", e);
                (
                    Status::Critical,
                    Some(format!(
                        "Request timed out after {} seconds. {e}",
                        config.timeout_seconds
                    )),
                )
            }
            Err(e) => {
                error!("HTTP request failed: {}", e);
                (Status::Critical, Some(format!("HTTP request failed: {e}")))
            }
        };

        HealthCheckRecord {
            timestamp: Utc::now(),
            status,
            response_time,
            error_message,
        }
    }
}
