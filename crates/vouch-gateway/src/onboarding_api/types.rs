//! Request/response bodies and the API error envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Error payload rendered as `{"error": "<single sentence>"}`.
///
/// The reason code stays server-side (logs and counters); the body carries
/// only the user-facing sentence.
#[derive(Debug)]
pub struct AuthApiError {
    status: StatusCode,
    reason_code: &'static str,
    message: String,
}

impl AuthApiError {
    pub fn new(status: StatusCode, reason_code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            reason_code,
            message: message.into(),
        }
    }

    pub fn bad_request(reason_code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, reason_code, message)
    }

    pub fn reason_code(&self) -> &'static str {
        self.reason_code
    }
}

impl IntoResponse for AuthApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"error": self.message}))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct SendCodeRequest {
    #[serde(default)]
    pub(super) email: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct LookupUserRequest {
    #[serde(default)]
    pub(super) email: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct CompleteSetupCodeRequest {
    #[serde(default)]
    pub(super) email: String,
    #[serde(default)]
    pub(super) code: String,
    #[serde(default)]
    pub(super) password: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct VerifyInviteRequest {
    #[serde(default)]
    pub(super) token: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct CompleteSetupRequest {
    #[serde(default)]
    pub(super) token: String,
    #[serde(default)]
    pub(super) password: String,
}

#[derive(Debug, Serialize)]
pub(super) struct LookupResponse {
    pub(super) status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) email: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct VerifyInviteResponse {
    pub(super) email: String,
}
