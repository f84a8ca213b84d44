//! Normalized failure taxonomy.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Delay reported for a 429 that carries no usable `Retry-After` header.
pub const DEFAULT_RETRY_AFTER_MS: u64 = 60_000;

/// Category of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    /// No response was received.
    Network,
    /// The backend rejected the credentials (401/403).
    Authentication,
    /// The backend rejected the payload (422).
    Validation,
    /// 5xx responses.
    Server,
    /// Any other 4xx response.
    Client,
    /// The request did not complete in time.
    Timeout,
}

impl ApiErrorKind {
    /// Classifies an HTTP status code.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Authentication,
            422 => Self::Validation,
            500..=599 => Self::Server,
            _ => Self::Client,
        }
    }

    /// Returns a generic message used when the backend sends none.
    #[must_use]
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::Network => "Unable to reach the server. Check your internet connection.",
            Self::Authentication => "Your session has expired. Please sign in again.",
            Self::Validation => "Some of the information provided is invalid.",
            Self::Server => "The server encountered an error. Please try again later.",
            Self::Client => "The request could not be completed.",
            Self::Timeout => "The request timed out. Please try again.",
        }
    }

    /// Returns true for failures that may succeed when replayed later.
    #[must_use]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Network | Self::Timeout)
    }

    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Authentication => "authentication",
            Self::Validation => "validation",
            Self::Server => "server",
            Self::Client => "client",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized request failure.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind} error: {message}")]
pub struct ApiError {
    /// Human-readable message.
    pub message: String,
    /// HTTP status, absent when no response arrived.
    pub status_code: Option<u16>,
    /// Failure category.
    pub kind: ApiErrorKind,
    /// Backend error code, when provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Milliseconds to wait before retrying (429 only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// Field-level details from the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Id of the request that failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ApiError {
    /// Creates an error of the given kind with no status.
    #[must_use]
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: None,
            kind,
            code: None,
            retry_after_ms: None,
            details: None,
            request_id: None,
        }
    }

    /// A failure where no response was received.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Network, message)
    }

    /// A request that ran out of time.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Timeout, message)
    }

    /// A credential failure raised locally (e.g. refresh rejected).
    #[must_use]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self {
            status_code: Some(401),
            ..Self::new(ApiErrorKind::Authentication, message)
        }
    }

    /// Builds an error from a non-success HTTP response.
    ///
    /// `retry_after` is the raw `Retry-After` header; it is only read for 429.
    #[must_use]
    pub fn from_response(status: u16, retry_after: Option<&str>, body: Option<&Value>) -> Self {
        let kind = ApiErrorKind::from_status(status);
        let message = body
            .and_then(extract_message)
            .unwrap_or_else(|| kind.default_message().to_string());

        let retry_after_ms = (status == 429).then(|| {
            retry_after
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .map_or(DEFAULT_RETRY_AFTER_MS, |secs| secs.saturating_mul(1000))
        });

        Self {
            message,
            status_code: Some(status),
            kind,
            code: body.and_then(extract_code),
            retry_after_ms,
            details: body.and_then(|b| b.get("errors").or_else(|| b.get("details")).cloned()),
            request_id: None,
        }
    }

    /// Attaches the request id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Returns true for network or timeout failures.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }

    /// Returns true for 401/403 style failures.
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        self.kind == ApiErrorKind::Authentication
    }
}

fn extract_message(body: &Value) -> Option<String> {
    let candidate = body
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| body.get("error").and_then(Value::as_str))
        .or_else(|| {
            body.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
        })?;
    let trimmed = candidate.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn extract_code(body: &Value) -> Option<String> {
    let raw = body.get("code").or_else(|| body.get("error_code"))?;
    match raw {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
