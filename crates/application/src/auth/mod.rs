//! Authentication: session lifecycle, persistence and backend calls.

mod backend;
mod error;
mod manager;
mod token_store;

pub use backend::{AuthApi, BackendAuthApi, OtpChallenge, VerifiedLogin};
pub use error::AuthError;
pub use manager::{AuthSessionManager, ValidationOutcome};
pub use token_store::{
    DEFAULT_REFRESH_BUFFER_SECS, GUEST_KEY, SESSION_KEY, TokenStatus, TokenStore, TokenStoreError,
};
