//! API response types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use medlearn_core::{BanDetails, DenyReason};
use serde::Serialize;
use serde_json::json;

/// Standard success wrapper: `{"data": ...}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    /// Create a success response.
    pub const fn ok(data: T) -> Self {
        Self { data }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Like [`ApiResponse`] but answers `201 Created`.
#[derive(Debug)]
pub struct Created<T: Serialize>(pub T);

impl<T: Serialize> IntoResponse for Created<T> {
    fn into_response(self) -> Response {
        (StatusCode::CREATED, Json(ApiResponse::ok(self.0))).into_response()
    }
}

/// `{"data": {"message": ...}}`.
#[must_use]
pub fn message(text: impl Into<String>) -> ApiResponse<serde_json::Value> {
    ApiResponse::ok(json!({ "message": text.into() }))
}

/// Why an identity could not be established for a request.
///
/// These render flat (`{"error": CODE, ...}`) so clients can branch on the
/// code without unwrapping an envelope.
#[derive(Debug, Clone)]
pub enum AccessError {
    NoToken,
    InvalidToken,
    UserNotFound,
    Denied(DenyReason),
    /// The ban check itself failed. Requests never proceed in this state.
    Internal,
}

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        match self {
            Self::NoToken => flat(
                StatusCode::UNAUTHORIZED,
                "NO_TOKEN",
                "Authentication required",
            ),
            Self::InvalidToken => flat(
                StatusCode::UNAUTHORIZED,
                "INVALID_TOKEN",
                "Invalid or expired token",
            ),
            Self::UserNotFound => flat(StatusCode::NOT_FOUND, "USER_NOT_FOUND", "User not found"),
            Self::Denied(reason) => denied(&reason),
            Self::Internal => flat(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Could not verify account status",
            ),
        }
    }
}

/// 403 for a banned or deleted account.
#[must_use]
pub fn denied(reason: &DenyReason) -> Response {
    match reason {
        DenyReason::Banned(details) => {
            (StatusCode::FORBIDDEN, Json(ban_body(details))).into_response()
        }
        DenyReason::Deleted => flat(
            StatusCode::FORBIDDEN,
            "USER_DELETED",
            "This account has been deleted",
        ),
    }
}

fn ban_body(details: &BanDetails) -> serde_json::Value {
    let mut body = json!({
        "error": "USER_BANNED",
        "message": "Your account has been banned",
        "ban_reason": details.reason,
        "banned_at": details.banned_at,
        "is_permanent": details.is_permanent,
    });
    if let Some(until) = details.banned_until {
        body["banned_until"] = json!(until);
    }
    if let Some(left) = details.time_left_ms {
        body["time_left"] = json!(left);
    }
    body
}

fn flat(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(json!({ "error": code, "message": message }))).into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_permanent_ban_omits_expiry_fields() {
        let body = ban_body(&BanDetails {
            reason: "spam".to_string(),
            banned_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            is_permanent: true,
            banned_until: None,
            time_left_ms: None,
        });

        assert_eq!(body["error"], "USER_BANNED");
        assert_eq!(body["ban_reason"], "spam");
        assert_eq!(body["is_permanent"], true);
        assert!(body.get("banned_until").is_none());
        assert!(body.get("time_left").is_none());
    }

    #[test]
    fn test_temporary_ban_carries_time_left() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let body = ban_body(&BanDetails {
            reason: "spam".to_string(),
            banned_at: at,
            is_permanent: false,
            banned_until: Some(at + chrono::Duration::hours(1)),
            time_left_ms: Some(3_600_000),
        });

        assert_eq!(body["time_left"], 3_600_000);
        assert!(body["banned_until"].is_string());
    }

    #[test]
    fn test_access_error_statuses() {
        assert_eq!(
            AccessError::NoToken.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AccessError::UserNotFound.into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AccessError::Denied(DenyReason::Deleted).into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AccessError::Internal.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
