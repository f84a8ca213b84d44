//! Persisted session storage with expiry tracking.
//!
//! The authenticated session and the guest profile live under separate keys
//! so that signing in never overwrites a guest record before the new session
//! is safely on disk.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use sparkle_domain::{Session, StoredSession, User};
use thiserror::Error;
use tracing::warn;

use crate::ports::{KeyValueStorage, StorageError};

/// Storage key for the authenticated session.
pub const SESSION_KEY: &str = "sparkle.auth.session";

/// Storage key for the guest profile.
pub const GUEST_KEY: &str = "sparkle.auth.guest";

/// Seconds before expiry at which a token counts as expiring.
pub const DEFAULT_REFRESH_BUFFER_SECS: i64 = 60;

/// Errors raised when persisting session data.
#[derive(Debug, Error)]
pub enum TokenStoreError {
    /// The record could not be encoded.
    #[error("failed to encode session: {0}")]
    Encode(#[from] serde_json::Error),

    /// The storage backend rejected the write.
    #[error("failed to write session: {0}")]
    Storage(#[from] StorageError),
}

/// Session persistence over a key-value store.
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn KeyValueStorage>,
}

impl TokenStore {
    /// Creates a store backed by `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self { storage }
    }

    /// Persists the authenticated session.
    ///
    /// # Errors
    ///
    /// Returns an error if the session could not be written.
    pub async fn save(&self, session: &StoredSession) -> Result<(), TokenStoreError> {
        let json = serde_json::to_string(session)?;
        self.storage.set(SESSION_KEY, &json).await?;
        Ok(())
    }

    /// Loads the authenticated session. Unreadable data counts as absent.
    pub async fn load(&self) -> Option<StoredSession> {
        self.read(SESSION_KEY).await
    }

    /// Persists the guest profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile could not be written.
    pub async fn save_guest(&self, user: &User) -> Result<(), TokenStoreError> {
        let json = serde_json::to_string(user)?;
        self.storage.set(GUEST_KEY, &json).await?;
        Ok(())
    }

    /// Loads the guest profile.
    pub async fn load_guest(&self) -> Option<User> {
        self.read(GUEST_KEY).await
    }

    /// Removes the guest profile. Failures are logged.
    pub async fn clear_guest(&self) {
        if let Err(e) = self.storage.remove(GUEST_KEY).await {
            warn!(error = %e, "Failed to clear guest profile");
        }
    }

    /// Removes every persisted session record. Failures are logged.
    pub async fn clear(&self) {
        if let Err(e) = self.storage.multi_remove(&[SESSION_KEY, GUEST_KEY]).await {
            warn!(error = %e, "Failed to clear persisted session");
        }
    }

    async fn read<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.storage.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key, error = %e, "Failed to read from storage");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Discarding unreadable stored record");
                None
            }
        }
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore").finish_non_exhaustive()
    }
}

/// Freshness of a session's access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStatus {
    /// No access token is held.
    NotAuthenticated,
    /// Token is valid and not expiring soon.
    Valid {
        /// Seconds until expiry, or None if no expiry.
        seconds_remaining: Option<i64>,
    },
    /// Token is valid but will expire soon.
    Expiring {
        /// Seconds until expiry.
        seconds_remaining: i64,
        /// Whether a refresh token is available.
        can_refresh: bool,
    },
    /// Token has expired.
    Expired {
        /// Whether a refresh token is available.
        can_refresh: bool,
    },
}

impl TokenStatus {
    /// Classifies the session's token at `now`.
    #[must_use]
    pub fn of(session: &Session, now: DateTime<Utc>, refresh_buffer_secs: i64) -> Self {
        let Some(tokens) = session.tokens() else {
            return Self::NotAuthenticated;
        };
        let can_refresh = tokens.refresh_token.is_some();
        let Some(expires_at) = tokens.expires_at else {
            return Self::Valid {
                seconds_remaining: None,
            };
        };

        let remaining = (expires_at - now).num_seconds();
        if expires_at <= now {
            Self::Expired { can_refresh }
        } else if expires_at - now <= TimeDelta::seconds(refresh_buffer_secs) {
            Self::Expiring {
                seconds_remaining: remaining,
                can_refresh,
            }
        } else {
            Self::Valid {
                seconds_remaining: Some(remaining),
            }
        }
    }

    /// Returns true if the token is valid (not expired).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. } | Self::Expiring { .. })
    }

    /// Returns true if the token should be refreshed now.
    #[must_use]
    pub const fn should_refresh(&self) -> bool {
        matches!(
            self,
            Self::Expiring {
                can_refresh: true,
                ..
            } | Self::Expired { can_refresh: true }
        )
    }
}
