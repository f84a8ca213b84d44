//! Connectivity ports used by the connection monitor

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Why a backend health probe failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// No answer within the probe timeout.
    #[error("health probe timed out after {0:?}")]
    Timeout(Duration),

    /// The backend answered with a non-success status.
    #[error("backend unhealthy: HTTP {0}")]
    Unhealthy(u16),

    /// The probe could not be sent.
    #[error("health probe failed: {0}")]
    Failed(String),
}

/// Active liveness check against the backend.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Hits the health endpoint and returns the round-trip latency.
    async fn probe(&self) -> Result<Duration, ProbeError>;
}

/// OS-level network connectivity.
#[async_trait]
pub trait NetworkReachability: Send + Sync {
    /// Returns true if the device currently has a network connection.
    async fn is_connected(&self) -> bool;
}
