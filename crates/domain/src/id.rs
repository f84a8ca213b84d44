//! ID generation utilities.

use uuid::Uuid;

/// Generates a new time-ordered identifier.
///
/// Used for request ids, queued request ids and device ids.
#[must_use]
pub fn generate_id() -> String {
    Uuid::now_v7().to_string()
}

/// Generates a request identifier with the `req_` prefix sent in `X-Request-Id`.
#[must_use]
pub fn generate_request_id() -> String {
    format!("req_{}", Uuid::now_v7().simple())
}

/// Generates the local identifier for a guest user record.
#[must_use]
pub fn generate_guest_id() -> String {
    format!("guest_{}", Uuid::now_v7().simple())
}
