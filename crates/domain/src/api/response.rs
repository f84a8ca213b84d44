//! Canonical success shape.
//!
//! The backend answers in two envelopes, `{status: "success", data, message}`
//! and `{success, data, message}`. Both are accepted and folded into one
//! shape. This tolerance exists for backend inconsistency and should not be
//! extended to new envelopes.
//!
//! TODO: drop the `status` envelope once every backend route answers with
//! `success`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Values of the `status` field that mark a failed envelope.
const FAILURE_STATUSES: &[&str] = &["error", "fail", "failed", "failure"];

/// Normalized response returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    /// False only when the envelope carried an explicit failure marker.
    pub success: bool,
    /// Payload, or the whole body when no `data` field is present.
    pub data: Value,
    /// Backend message, when provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// HTTP status code.
    pub status_code: u16,
    /// Id of the request that produced this response.
    pub request_id: String,
}

impl ApiResponse {
    /// Normalizes a 2xx response body.
    #[must_use]
    pub fn from_body(status_code: u16, body: Option<Value>, request_id: impl Into<String>) -> Self {
        let request_id = request_id.into();
        match body {
            Some(Value::Object(map)) => Self::from_object(status_code, map, request_id),
            Some(other) => Self {
                success: true,
                data: other,
                message: None,
                status_code,
                request_id,
            },
            None => Self {
                success: true,
                data: Value::Null,
                message: None,
                status_code,
                request_id,
            },
        }
    }

    fn from_object(status_code: u16, mut map: Map<String, Value>, request_id: String) -> Self {
        let success = !has_failure_marker(&map);
        let message = map
            .get("message")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        let data = map
            .remove("data")
            .unwrap_or_else(|| Value::Object(map));

        Self {
            success,
            data,
            message,
            status_code,
            request_id,
        }
    }

    /// Deserializes `data` into a typed value.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not match `T`.
    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

fn has_failure_marker(map: &Map<String, Value>) -> bool {
    if map.get("success").and_then(Value::as_bool) == Some(false) {
        return true;
    }
    map.get("status")
        .and_then(Value::as_str)
        .is_some_and(|status| {
            FAILURE_STATUSES
                .iter()
                .any(|failure| status.eq_ignore_ascii_case(failure))
        })
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_both_envelopes_normalize_identically() {
        let status_shape = ApiResponse::from_body(
            200,
            Some(json!({"status": "success", "data": {"id": 7}, "message": "ok"})),
            "req_1",
        );
        let success_shape = ApiResponse::from_body(
            200,
            Some(json!({"success": true, "data": {"id": 7}, "message": "ok"})),
            "req_1",
        );

        assert_eq!(status_shape, success_shape);
        assert!(status_shape.success);
        assert_eq!(status_shape.data, json!({"id": 7}));
    }

    #[test]
    fn test_missing_success_field_defaults_to_success() {
        let response = ApiResponse::from_body(200, Some(json!({"data": [1, 2]})), "req_2");
        assert!(response.success);
        assert_eq!(response.data, json!([1, 2]));
        assert_eq!(response.message, None);
    }

    #[test]
    fn test_explicit_failure_markers() {
        let by_flag = ApiResponse::from_body(
            200,
            Some(json!({"success": false, "message": "Slot unavailable"})),
            "req_3",
        );
        assert!(!by_flag.success);
        assert_eq!(by_flag.message.as_deref(), Some("Slot unavailable"));

        let by_status = ApiResponse::from_body(200, Some(json!({"status": "ERROR"})), "req_4");
        assert!(!by_status.success);
    }

    #[test]
    fn test_body_without_data_becomes_data() {
        let response = ApiResponse::from_body(200, Some(json!({"services": ["wash"]})), "req_5");
        assert_eq!(response.data, json!({"services": ["wash"]}));
    }

    #[test]
    fn test_empty_and_scalar_bodies() {
        let empty = ApiResponse::from_body(204, None, "req_6");
        assert!(empty.success);
        assert_eq!(empty.data, Value::Null);

        let list = ApiResponse::from_body(200, Some(json!(["a"])), "req_7");
        assert_eq!(list.data, json!(["a"]));
    }

    #[test]
    fn test_data_as_typed() {
        #[derive(Deserialize)]
        struct Booking {
            id: u32,
        }
        let response = ApiResponse::from_body(200, Some(json!({"data": {"id": 3}})), "req_8");
        let booking: Booking = response.data_as().expect("typed payload");
        assert_eq!(booking.id, 3);
    }
}
