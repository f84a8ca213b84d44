//! OS-level connectivity check.

use std::time::Duration;

use async_trait::async_trait;
use sparkle_application::ports::NetworkReachability;
use tokio::net::TcpStream;
use tracing::trace;

/// Treats the network as up when a TCP connection to `target` succeeds.
#[derive(Debug, Clone)]
pub struct TcpReachability {
    target: String,
    timeout: Duration,
}

impl TcpReachability {
    /// Creates a check that dials `target` (`host:port`).
    #[must_use]
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            timeout,
        }
    }
}

#[async_trait]
impl NetworkReachability for TcpReachability {
    async fn is_connected(&self) -> bool {
        let connected = matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(&self.target)).await,
            Ok(Ok(_))
        );
        trace!(target = %self.target, connected, "Reachability check");
        connected
    }
}

/// Always reports the network as up.
///
/// For hosts where the backend health probe alone decides reachability.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeConnected;

#[async_trait]
impl NetworkReachability for AssumeConnected {
    async fn is_connected(&self) -> bool {
        true
    }
}
