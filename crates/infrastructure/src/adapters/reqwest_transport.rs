//! HTTP transport implementation using reqwest.
//!
//! This adapter implements the `Transport` port. It only moves bytes: every
//! response that arrives is handed back, whatever its status, and errors are
//! reserved for exchanges that produced no response at all.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;
use sparkle_application::ports::{Transport, TransportError, TransportRequest, TransportResponse};
use sparkle_domain::HttpMethod;
use tracing::trace;

/// Transport backed by `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Creates a transport with a fresh client.
    ///
    /// Redirects are followed up to 10 hops.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be created.
    pub fn new(user_agent: &str) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;

        Ok(Self { client })
    }

    /// Creates a transport around an existing client.
    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }

    const fn to_reqwest_method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        }
    }

    fn map_error(error: &reqwest::Error, timeout_ms: u64) -> TransportError {
        if error.is_timeout() {
            return TransportError::Timeout { timeout_ms };
        }
        if error.is_connect() || error.is_request() {
            return TransportError::Connection(error.to_string());
        }
        if error.is_builder() {
            return TransportError::InvalidRequest(error.to_string());
        }
        TransportError::Other(error.to_string())
    }

    /// Parses a body as JSON, falling back to a string value. Empty bodies
    /// become `None`.
    fn parse_body(bytes: &[u8]) -> Option<Value> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        Some(serde_json::from_slice(bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let timeout_ms = u64::try_from(request.timeout.as_millis()).unwrap_or(u64::MAX);

        let mut builder = self
            .client
            .request(Self::to_reqwest_method(request.method), request.url.clone())
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            let encoded = serde_json::to_vec(body)
                .map_err(|e| TransportError::InvalidRequest(format!("Invalid JSON: {e}")))?;
            builder = builder.body(encoded);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Self::map_error(&e, timeout_ms))?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_ascii_lowercase(),
                    v.to_str().unwrap_or("<binary>").to_string(),
                )
            })
            .collect();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Self::map_error(&e, timeout_ms))?;
        trace!(status, bytes = bytes.len(), url = %request.url, "Response received");

        Ok(TransportResponse {
            status,
            headers,
            body: Self::parse_body(&bytes),
        })
    }
}
