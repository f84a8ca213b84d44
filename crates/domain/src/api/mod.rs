//! Canonical response and error shapes for backend calls.

mod error;
mod response;

pub use error::{ApiError, ApiErrorKind, DEFAULT_RETRY_AFTER_MS};
pub use response::ApiResponse;
