//! Device identity port

use async_trait::async_trait;

/// Supplies a stable identifier for this installation.
#[async_trait]
pub trait DeviceIdentity: Send + Sync {
    /// Stable device id, or `"unknown"` if it cannot be determined.
    async fn device_id(&self) -> String;

    /// Platform name sent alongside the id.
    fn platform(&self) -> &str;

    /// Headers attached to authentication-sensitive requests.
    async fn headers(&self) -> Vec<(String, String)> {
        vec![
            ("X-Device-Id".to_string(), self.device_id().await),
            ("X-Device-Platform".to_string(), self.platform().to_string()),
        ]
    }
}
