//! Seam between the HTTP client and whoever owns the session.

use async_trait::async_trait;
use sparkle_domain::ApiError;

/// Supplies credentials to the HTTP client.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Current access token. Waits for an in-flight refresh to settle first.
    async fn access_token(&self) -> Option<String>;

    /// Obtains a new access token. Concurrent callers share one refresh.
    ///
    /// # Errors
    ///
    /// Returns an authentication error if the session could not be renewed.
    async fn refresh_access_token(&self) -> Result<String, ApiError>;

    /// Waits for a refresh that is already running and returns its outcome.
    /// `None` when nothing was in flight.
    async fn join_refresh(&self) -> Option<Result<String, ApiError>> {
        None
    }
}

/// Provider for clients that only make anonymous calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSession;

#[async_trait]
impl SessionProvider for NoSession {
    async fn access_token(&self) -> Option<String> {
        None
    }

    async fn refresh_access_token(&self) -> Result<String, ApiError> {
        Err(ApiError::authentication("Not signed in"))
    }
}
