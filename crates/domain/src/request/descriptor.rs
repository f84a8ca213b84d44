//! Request descriptors and retry-queue entries.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::HttpMethod;
use crate::id::generate_id;

/// Per-call options chosen by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestOptions {
    /// Park the request in the retry queue instead of failing when offline.
    #[serde(default)]
    pub queue_if_offline: bool,
    /// Overrides the client's default retry budget for queued attempts.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Do not attach the bearer token.
    #[serde(default)]
    pub skip_auth: bool,
    /// Do not attempt a token refresh on 401.
    #[serde(default)]
    pub skip_refresh: bool,
    /// Overrides the client's default request timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Options that opt into offline queueing.
    #[must_use]
    pub fn queued() -> Self {
        Self {
            queue_if_offline: true,
            ..Self::default()
        }
    }

    /// Options for calls that must not carry a session.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            skip_auth: true,
            skip_refresh: true,
            ..Self::default()
        }
    }
}

/// Everything needed to (re)issue one logical request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    /// HTTP method.
    pub method: HttpMethod,
    /// Path relative to the API base URL, or an absolute URL.
    pub url: String,
    /// Optional JSON body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    /// Extra caller headers, applied after the standard ones.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Caller options.
    #[serde(default)]
    pub options: RequestOptions,
}

impl RequestDescriptor {
    /// Creates a descriptor with default options.
    #[must_use]
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            headers: BTreeMap::new(),
            options: RequestOptions::default(),
        }
    }

    /// Sets the JSON body.
    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Adds a caller header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Replaces the options.
    #[must_use]
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}

/// A request parked while the device is offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRequest {
    /// Queue entry id.
    pub id: String,
    /// The request to replay.
    pub descriptor: RequestDescriptor,
    /// When the entry was queued.
    pub enqueued_at: DateTime<Utc>,
    /// Replays attempted so far.
    pub retry_count: u32,
    /// Replays allowed before the entry is rejected.
    pub max_retries: u32,
}

impl QueuedRequest {
    /// Creates a fresh entry with no attempts.
    #[must_use]
    pub fn new(descriptor: RequestDescriptor, max_retries: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: generate_id(),
            descriptor,
            enqueued_at: now,
            retry_count: 0,
            max_retries,
        }
    }

    /// Returns true once the entry has been queued for longer than `max_age`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        let age = now.signed_duration_since(self.enqueued_at);
        age.to_std().is_ok_and(|age| age > max_age)
    }

    /// Returns true when no replays remain.
    #[must_use]
    pub const fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_descriptor_builder() {
        let descriptor = RequestDescriptor::new(HttpMethod::Post, "/bookings")
            .with_body(serde_json::json!({"service_id": 4}))
            .with_header("X-Trace", "abc")
            .with_options(RequestOptions::queued());

        assert_eq!(descriptor.method, HttpMethod::Post);
        assert_eq!(descriptor.headers.get("X-Trace").map(String::as_str), Some("abc"));
        assert!(descriptor.options.queue_if_offline);
        assert!(!descriptor.options.skip_auth);
    }

    #[test]
    fn test_queued_request_expiry() {
        let now = Utc::now();
        let entry = QueuedRequest::new(
            RequestDescriptor::new(HttpMethod::Get, "/services"),
            3,
            now,
        );

        let max_age = Duration::from_secs(300);
        assert!(!entry.is_expired(now + TimeDelta::seconds(299), max_age));
        assert!(entry.is_expired(now + TimeDelta::seconds(301), max_age));
        // Clock skew backwards never expires an entry.
        assert!(!entry.is_expired(now - TimeDelta::seconds(10), max_age));
    }

    #[test]
    fn test_retries_exhausted() {
        let mut entry = QueuedRequest::new(
            RequestDescriptor::new(HttpMethod::Get, "/services"),
            2,
            Utc::now(),
        );
        assert!(!entry.retries_exhausted());
        entry.retry_count = 2;
        assert!(entry.retries_exhausted());
    }
}
