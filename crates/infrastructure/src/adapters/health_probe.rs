//! Backend health probe over HTTP.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use sparkle_application::ports::{HealthProbe, ProbeError};
use tracing::debug;
use url::Url;

/// Probes a health endpoint with a bodiless GET and times the round trip.
#[derive(Debug, Clone)]
pub struct ReqwestHealthProbe {
    client: Client,
    url: Url,
    timeout: Duration,
}

impl ReqwestHealthProbe {
    /// Creates a probe against `url`.
    #[must_use]
    pub const fn new(client: Client, url: Url, timeout: Duration) -> Self {
        Self {
            client,
            url,
            timeout,
        }
    }
}

#[async_trait]
impl HealthProbe for ReqwestHealthProbe {
    async fn probe(&self) -> Result<Duration, ProbeError> {
        let start = Instant::now();
        let response = self
            .client
            .get(self.url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout(self.timeout)
                } else {
                    ProbeError::Failed(e.to_string())
                }
            })?;
        let latency = start.elapsed();

        let status = response.status();
        debug!(status = status.as_u16(), latency_ms = latency.as_millis(), "Health probe");
        if status.is_success() {
            Ok(latency)
        } else {
            Err(ProbeError::Unhealthy(status.as_u16()))
        }
    }
}
