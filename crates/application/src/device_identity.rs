//! Stable per-installation device identity.

use std::sync::Arc;

use async_trait::async_trait;
use sparkle_domain::generate_id;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::ports::{DeviceIdentity, KeyValueStorage, StorageError};

/// Storage key for the device id.
pub const DEVICE_ID_KEY: &str = "sparkle.device.id";

/// Value reported when no id could be read or created.
pub const UNKNOWN_DEVICE_ID: &str = "unknown";

/// Device id generated once and kept in storage.
pub struct StoredDeviceIdentity {
    storage: Arc<dyn KeyValueStorage>,
    platform: String,
    cached: OnceCell<String>,
}

impl StoredDeviceIdentity {
    /// Creates an identity for the current OS.
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self::with_platform(storage, std::env::consts::OS)
    }

    /// Creates an identity with an explicit platform name.
    #[must_use]
    pub fn with_platform(storage: Arc<dyn KeyValueStorage>, platform: impl Into<String>) -> Self {
        Self {
            storage,
            platform: platform.into(),
            cached: OnceCell::new(),
        }
    }

    async fn load_or_create(&self) -> Result<String, StorageError> {
        if let Some(id) = self.storage.get(DEVICE_ID_KEY).await?
            && !id.is_empty()
        {
            return Ok(id);
        }
        let id = generate_id();
        if let Err(e) = self.storage.set(DEVICE_ID_KEY, &id).await {
            warn!(error = %e, "Failed to persist device id");
        }
        debug!(device_id = %id, "Generated device id");
        Ok(id)
    }
}

#[async_trait]
impl DeviceIdentity for StoredDeviceIdentity {
    /// Read failures are not cached; the next call tries storage again.
    async fn device_id(&self) -> String {
        match self.cached.get_or_try_init(|| self.load_or_create()).await {
            Ok(id) => id.clone(),
            Err(e) => {
                warn!(error = %e, "Failed to read device id");
                UNKNOWN_DEVICE_ID.to_string()
            }
        }
    }

    fn platform(&self) -> &str {
        &self.platform
    }
}

impl std::fmt::Debug for StoredDeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredDeviceIdentity")
            .field("platform", &self.platform)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryStorage;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_device_id_is_stable() {
        let storage = Arc::new(MemoryStorage::default());
        let identity = StoredDeviceIdentity::with_platform(storage.clone(), "linux");

        let first = identity.device_id().await;
        assert_eq!(identity.device_id().await, first);
        assert_eq!(storage.raw(DEVICE_ID_KEY), Some(first.clone()));

        let reopened = StoredDeviceIdentity::with_platform(storage, "linux");
        assert_eq!(reopened.device_id().await, first);
    }

    #[tokio::test]
    async fn test_unreadable_storage_reports_unknown() {
        let storage = Arc::new(MemoryStorage::default());
        storage.fail_reads(true);
        let identity = StoredDeviceIdentity::with_platform(storage, "linux");

        assert_eq!(identity.device_id().await, UNKNOWN_DEVICE_ID);
    }

    #[tokio::test]
    async fn test_recovers_after_storage_comes_back() {
        let storage = Arc::new(MemoryStorage::default());
        storage.fail_reads(true);
        let identity = StoredDeviceIdentity::with_platform(storage.clone(), "linux");
        assert_eq!(identity.device_id().await, UNKNOWN_DEVICE_ID);

        storage.fail_reads(false);
        let recovered = identity.device_id().await;
        assert_ne!(recovered, UNKNOWN_DEVICE_ID);
        assert_eq!(storage.raw(DEVICE_ID_KEY), Some(recovered.clone()));
        assert_eq!(identity.device_id().await, recovered);
    }

    #[tokio::test]
    async fn test_headers() {
        let identity =
            StoredDeviceIdentity::with_platform(Arc::new(MemoryStorage::default()), "android");
        let headers = identity.headers().await;

        assert_eq!(headers[0].0, "X-Device-Id");
        assert_eq!(headers[1], ("X-Device-Platform".to_string(), "android".to_string()));
    }
}
