//! Authentication error types.

use sparkle_domain::{ApiError, ApiErrorKind, DomainError};
use thiserror::Error;

/// Typed failure of an auth operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AuthError {
    /// The phone number or code was rejected before any call was made.
    #[error(transparent)]
    InvalidInput(#[from] DomainError),

    /// The backend call failed.
    #[error("{}", .0.message)]
    Api(#[from] ApiError),

    /// The session could not be saved; nothing was changed.
    #[error("could not save the session: {0}")]
    Persistence(String),

    /// The operation needs a signed-in or guest session.
    #[error("not signed in")]
    NotSignedIn,

    /// A guest login was attempted while signed in.
    #[error("already signed in")]
    AlreadySignedIn,
}

impl AuthError {
    /// Kind of the underlying API failure, if any.
    #[must_use]
    pub const fn api_kind(&self) -> Option<ApiErrorKind> {
        match self {
            Self::Api(error) => Some(error.kind),
            _ => None,
        }
    }

    /// Message suitable for showing to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidInput(DomainError::InvalidPhone(_)) => {
                "Please enter a valid phone number.".to_string()
            }
            Self::InvalidInput(DomainError::InvalidOtp(_)) => {
                "Please enter the code we sent you.".to_string()
            }
            Self::InvalidInput(e) => e.to_string(),
            Self::Api(error) if error.message.is_empty() => {
                error.kind.default_message().to_string()
            }
            Self::Api(error) => error.message.clone(),
            Self::Persistence(_) => {
                "We couldn't save your session. Please try again.".to_string()
            }
            Self::NotSignedIn => "Please sign in to continue.".to_string(),
            Self::AlreadySignedIn => "You are already signed in.".to_string(),
        }
    }
}
