//! Single request attempt: decorate, send, normalize.

use std::sync::Arc;
use std::time::Instant;

use sparkle_domain::{
    ApiError, ApiErrorKind, ApiResponse, ClientConfig, RequestDescriptor, generate_request_id,
};
use tracing::{debug, warn};

use crate::ports::{DeviceIdentity, Transport, TransportRequest};

/// Sends one request and normalizes whatever comes back.
#[derive(Clone)]
pub struct RequestPipeline {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    device: Arc<dyn DeviceIdentity>,
}

impl RequestPipeline {
    /// Creates a pipeline.
    #[must_use]
    pub fn new(
        config: Arc<ClientConfig>,
        transport: Arc<dyn Transport>,
        device: Arc<dyn DeviceIdentity>,
    ) -> Self {
        Self {
            config,
            transport,
            device,
        }
    }

    /// Client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sends `descriptor` once.
    ///
    /// Headers are attached in a fixed order: standard headers, then the
    /// bearer token, then device identity for auth endpoints. Caller headers
    /// override any of these.
    ///
    /// # Errors
    ///
    /// Returns a normalized error for non-2xx responses and transport
    /// failures.
    pub async fn send(
        &self,
        descriptor: &RequestDescriptor,
        bearer: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        let request_id = generate_request_id();
        let url = self.config.resolve_url(&descriptor.url).map_err(|e| {
            ApiError::new(ApiErrorKind::Client, e.to_string()).with_request_id(&request_id)
        })?;

        let mut headers = vec![("Accept".to_string(), "application/json".to_string())];
        if descriptor.body.is_some() {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }
        headers.push(("X-Request-Id".to_string(), request_id.clone()));
        headers.push((
            "X-Client-Version".to_string(),
            self.config.client_version.clone(),
        ));
        if let Some(token) = bearer {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        if self.config.is_auth_endpoint(&descriptor.url) {
            headers.extend(self.device.headers().await);
        }
        for (name, value) in &descriptor.headers {
            match headers
                .iter_mut()
                .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            {
                Some(slot) => slot.1.clone_from(value),
                None => headers.push((name.clone(), value.clone())),
            }
        }

        let request = TransportRequest {
            method: descriptor.method,
            url,
            headers,
            body: descriptor.body.clone(),
            timeout: descriptor
                .options
                .timeout
                .unwrap_or_else(|| self.config.request_timeout()),
        };

        let started = Instant::now();
        let result = self.transport.send(request).await;
        let elapsed_ms = started.elapsed().as_millis();

        match result {
            Ok(response) if response.is_success() => {
                debug!(
                    method = %descriptor.method,
                    url = %descriptor.url,
                    status = response.status,
                    elapsed_ms,
                    request_id = %request_id,
                    "Request completed"
                );
                Ok(ApiResponse::from_body(
                    response.status,
                    response.body,
                    request_id,
                ))
            }
            Ok(response) => {
                let error = ApiError::from_response(
                    response.status,
                    response.header("retry-after"),
                    response.body.as_ref(),
                )
                .with_request_id(&request_id);
                warn!(
                    method = %descriptor.method,
                    url = %descriptor.url,
                    status = response.status,
                    kind = %error.kind,
                    elapsed_ms,
                    request_id = %request_id,
                    "Request failed"
                );
                Err(error)
            }
            Err(e) => {
                warn!(
                    method = %descriptor.method,
                    url = %descriptor.url,
                    error = %e,
                    elapsed_ms,
                    request_id = %request_id,
                    "Request could not be sent"
                );
                Err(e.into_api_error().with_request_id(request_id))
            }
        }
    }
}

impl std::fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}
