//! Connection health types.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latency below which a connection is excellent.
pub const EXCELLENT_LATENCY: Duration = Duration::from_millis(200);
/// Latency below which a connection is good.
pub const GOOD_LATENCY: Duration = Duration::from_millis(500);
/// Latency below which a connection is fair.
pub const FAIR_LATENCY: Duration = Duration::from_millis(1000);

/// Coarse classification of reachability and latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    /// Under 200 ms.
    Excellent,
    /// Under 500 ms.
    Good,
    /// Under 1 s.
    Fair,
    /// Slow, or online with the backend unreachable.
    Poor,
    /// No connectivity.
    #[default]
    Offline,
}

impl ConnectionQuality {
    /// Classifies a health check result.
    ///
    /// `latency` is `None` when the probe failed.
    #[must_use]
    pub fn classify(is_online: bool, latency: Option<Duration>) -> Self {
        if !is_online {
            return Self::Offline;
        }
        match latency {
            None => Self::Poor,
            Some(l) if l < EXCELLENT_LATENCY => Self::Excellent,
            Some(l) if l < GOOD_LATENCY => Self::Good,
            Some(l) if l < FAIR_LATENCY => Self::Fair,
            Some(_) => Self::Poor,
        }
    }

    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reachability state derived from a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// No network.
    Offline,
    /// Network up, backend not answering.
    OnlineUnreachable,
    /// Backend answering slowly.
    OnlineDegraded,
    /// Backend answering quickly.
    OnlineHealthy,
}

/// Discrete transition notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// Network became available.
    Online,
    /// Network went away.
    Offline,
    /// Backend stopped answering.
    BackendUnreachable,
    /// Backend answered again.
    BackendRestored,
}

impl ConnectionEvent {
    /// Returns true for events after which queued work can be replayed.
    #[must_use]
    pub const fn is_recovery(self) -> bool {
        matches!(self, Self::Online | Self::BackendRestored)
    }
}

/// One entry of the persisted event history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEventRecord {
    /// What happened.
    pub event: ConnectionEvent,
    /// When it happened.
    pub at: DateTime<Utc>,
    /// Quality right after the event.
    pub quality: ConnectionQuality,
    /// Probe latency right after the event.
    #[serde(default)]
    pub latency_ms: Option<u64>,
}

/// Process-wide connectivity snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConnectionStatus {
    /// OS reports a network connection.
    pub is_online: bool,
    /// Last health probe succeeded.
    pub is_backend_reachable: bool,
    /// Current classification.
    pub connection_quality: ConnectionQuality,
    /// Last probe round trip.
    #[serde(default)]
    pub latency_ms: Option<u64>,
    /// Last successful probe.
    #[serde(default)]
    pub last_successful_connection_at: Option<DateTime<Utc>>,
    /// Failed probes since the last success.
    #[serde(default)]
    pub consecutive_failures: u32,
    /// When this status was computed.
    #[serde(default)]
    pub checked_at: Option<DateTime<Utc>>,
}

impl ConnectionStatus {
    /// Status assumed before the first check completes: online and reachable
    /// with unknown latency.
    #[must_use]
    pub const fn optimistic() -> Self {
        Self {
            is_online: true,
            is_backend_reachable: true,
            connection_quality: ConnectionQuality::Fair,
            latency_ms: None,
            last_successful_connection_at: None,
            consecutive_failures: 0,
            checked_at: None,
        }
    }

    /// Returns the reachability state.
    #[must_use]
    pub const fn health_state(&self) -> HealthState {
        if !self.is_online {
            return HealthState::Offline;
        }
        if !self.is_backend_reachable {
            return HealthState::OnlineUnreachable;
        }
        match self.connection_quality {
            ConnectionQuality::Excellent | ConnectionQuality::Good => HealthState::OnlineHealthy,
            _ => HealthState::OnlineDegraded,
        }
    }

    /// Online and either reachable or not classified offline.
    ///
    /// Deliberately permissive so degraded states still allow optimistic
    /// requests.
    #[must_use]
    pub fn can_make_requests(&self) -> bool {
        self.is_online
            && (self.is_backend_reachable || self.connection_quality != ConnectionQuality::Offline)
    }
}
