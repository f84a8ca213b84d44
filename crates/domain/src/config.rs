//! Client configuration.
//!
//! Every field has a default so a partial file or a handful of environment
//! overrides is enough.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DomainError, DomainResult};

/// Backend paths, relative to `base_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Starts OTP login.
    pub send_otp: String,
    /// Completes OTP login.
    pub verify_otp: String,
    /// Exchanges a refresh token.
    pub refresh: String,
    /// Invalidates the session server-side.
    pub logout: String,
    /// Returns the signed-in user.
    pub current_user: String,
    /// Updates the signed-in user.
    pub profile: String,
    /// Lightweight liveness endpoint.
    pub health: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            send_otp: "/auth/send-otp".to_string(),
            verify_otp: "/auth/verify-otp".to_string(),
            refresh: "/auth/refresh-token".to_string(),
            logout: "/auth/logout".to_string(),
            current_user: "/auth/me".to_string(),
            profile: "/users/profile".to_string(),
            health: "/health".to_string(),
        }
    }
}

/// Connection monitor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Seconds between periodic probes.
    pub check_interval_secs: u64,
    /// Probe timeout in milliseconds.
    pub probe_timeout_ms: u64,
    /// Maximum events kept in history.
    pub history_limit: usize,
    /// `host:port` dialed to decide whether the device is online.
    pub reachability_target: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 30,
            probe_timeout_ms: 5_000,
            history_limit: 50,
            reachability_target: "1.1.1.1:53".to_string(),
        }
    }
}

impl HealthConfig {
    /// Interval between periodic probes.
    #[must_use]
    pub const fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Probe timeout.
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Session validation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds between validation ticks.
    pub validation_interval_secs: u64,
    /// Minimum seconds between backend validations after a success.
    pub min_revalidation_secs: u64,
    /// Country code assumed for bare local phone numbers.
    pub default_country_code: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            validation_interval_secs: 60,
            min_revalidation_secs: 300,
            default_country_code: "91".to_string(),
        }
    }
}

impl SessionConfig {
    /// Interval between validation ticks.
    #[must_use]
    pub const fn validation_interval(&self) -> Duration {
        Duration::from_secs(self.validation_interval_secs)
    }

    /// Minimum time between backend validations.
    #[must_use]
    pub const fn min_revalidation(&self) -> Duration {
        Duration::from_secs(self.min_revalidation_secs)
    }
}

/// Offline retry queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Replays per queued request.
    pub max_retries: u32,
    /// Seconds a request may stay queued.
    pub max_age_secs: u64,
    /// Maximum queued requests.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_age_secs: 300,
            capacity: 50,
        }
    }
}

impl QueueConfig {
    /// Maximum time a request may stay queued.
    #[must_use]
    pub const fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// API root, e.g. `https://api.example.com/api`.
    pub base_url: String,
    /// Requests whose path contains this prefix are auth endpoints.
    pub auth_path_prefix: String,
    /// Sent as `X-Client-Version`.
    pub client_version: String,
    /// Default request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// File used by the key-value storage adapter.
    pub storage_path: String,
    /// Backend paths.
    pub endpoints: EndpointConfig,
    /// Connection monitor.
    pub health: HealthConfig,
    /// Session validation.
    pub session: SessionConfig,
    /// Retry queue.
    pub queue: QueueConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            auth_path_prefix: "/auth/".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            request_timeout_ms: 30_000,
            storage_path: "sparkle-storage.json".to_string(),
            endpoints: EndpointConfig::default(),
            health: HealthConfig::default(),
            session: SessionConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Creates a default configuration for a base URL.
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Default request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Resolves a path against `base_url`. Absolute URLs pass through.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidUrl` if the result does not parse.
    pub fn resolve_url(&self, path: &str) -> DomainResult<Url> {
        let raw = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!(
                "{}/{}",
                self.base_url.trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        };
        Url::parse(&raw).map_err(|e| DomainError::InvalidUrl(format!("{e}: {raw}")))
    }

    /// Returns true if `path` targets an auth endpoint.
    #[must_use]
    pub fn is_auth_endpoint(&self, path: &str) -> bool {
        let prefix = self.auth_path_prefix.trim_end_matches('/');
        !prefix.is_empty()
            && (path.contains(&format!("{prefix}/")) || path.ends_with(prefix))
    }
}
