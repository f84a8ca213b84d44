//! HTTP transport port

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sparkle_domain::{ApiError, HttpMethod};
use thiserror::Error;
use url::Url;

/// A fully decorated request ready to go on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: Url,
    /// Headers in the order they were attached.
    pub headers: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<Value>,
    /// Time allowed for the whole exchange.
    pub timeout: Duration,
}

impl TransportRequest {
    /// Returns the first header with the given name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Raw response as received.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Headers with lowercase names.
    pub headers: HashMap<String, String>,
    /// Parsed JSON body; non-JSON text arrives as a string value.
    pub body: Option<Value>,
}

impl TransportResponse {
    /// Creates a response with a JSON body and no headers.
    #[must_use]
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Some(body),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Looks a header up by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Failures where no HTTP response was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request did not complete in time.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout that was exceeded.
        timeout_ms: u64,
    },

    /// The connection could not be established or was dropped.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Any other transport failure.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Converts to the normalized error taxonomy.
    #[must_use]
    pub fn into_api_error(self) -> ApiError {
        match self {
            Self::Timeout { .. } => ApiError::timeout(self.to_string()),
            Self::InvalidRequest(message) => {
                ApiError::new(sparkle_domain::ApiErrorKind::Client, message)
            }
            Self::Connection(_) | Self::Other(_) => ApiError::network(self.to_string()),
        }
    }
}

/// Port for executing HTTP requests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a request and returns whatever response arrived.
    ///
    /// # Errors
    ///
    /// Returns an error only when no response was received.
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}
