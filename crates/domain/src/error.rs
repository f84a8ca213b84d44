//! Domain error types

use thiserror::Error;

/// Domain-level errors that can occur during validation or processing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The provided URL is invalid or malformed.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// A phone number could not be normalized.
    #[error("invalid phone number: {0}")]
    InvalidPhone(String),

    /// A one-time code has the wrong shape.
    #[error("invalid verification code: {0}")]
    InvalidOtp(String),
}

/// Result type alias for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
