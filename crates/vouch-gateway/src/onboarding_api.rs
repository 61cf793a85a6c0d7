//! Onboarding auth endpoints: code request, account lookup, and the two
//! setup-completion paths.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde_json::json;
use vouch_setup::{OnboardingService, SetupError};

mod server_bootstrap;
mod types;

pub use server_bootstrap::{build_onboarding_router, run_onboarding_gateway};
pub use types::AuthApiError;
use types::{
    CompleteSetupCodeRequest, CompleteSetupRequest, LookupResponse, LookupUserRequest,
    SendCodeRequest, VerifyInviteRequest, VerifyInviteResponse,
};

pub const SEND_CODE_ENDPOINT: &str = "/api/auth/send-code";
pub const LOOKUP_USER_ENDPOINT: &str = "/api/auth/lookup-user";
pub const COMPLETE_SETUP_CODE_ENDPOINT: &str = "/api/auth/complete-setup-code";
pub const VERIFY_INVITE_ENDPOINT: &str = "/api/auth/verify-invite";
pub const COMPLETE_SETUP_ENDPOINT: &str = "/api/auth/complete-setup";

#[derive(Clone)]
/// Configuration for the onboarding gateway server.
pub struct OnboardingGatewayConfig {
    pub bind: String,
    pub service: Arc<OnboardingService>,
}

/// Shared handler state: the service plus request-outcome counters.
pub struct OnboardingGatewayState {
    config: OnboardingGatewayConfig,
    runtime: Mutex<OnboardingRuntimeState>,
}

#[derive(Debug, Clone, Default)]
struct OnboardingRuntimeState {
    total_requests: u64,
    reason_code_counts: BTreeMap<String, u64>,
}

impl OnboardingGatewayState {
    pub fn new(config: OnboardingGatewayConfig) -> Self {
        Self {
            config,
            runtime: Mutex::new(OnboardingRuntimeState::default()),
        }
    }

    fn record_request(&self) {
        if let Ok(mut runtime) = self.runtime.lock() {
            runtime.total_requests = runtime.total_requests.saturating_add(1);
        }
    }

    fn record_reason(&self, reason_code: &str) {
        if reason_code.trim().is_empty() {
            return;
        }
        if let Ok(mut runtime) = self.runtime.lock() {
            *runtime
                .reason_code_counts
                .entry(reason_code.to_string())
                .or_default() += 1;
        }
    }

    #[cfg(test)]
    fn total_requests(&self) -> u64 {
        self.runtime
            .lock()
            .map(|runtime| runtime.total_requests)
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn reason_count(&self, reason_code: &str) -> u64 {
        self.runtime
            .lock()
            .map(|runtime| {
                runtime
                    .reason_code_counts
                    .get(reason_code)
                    .copied()
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

fn parse_json_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, AuthApiError> {
    serde_json::from_slice::<T>(body).map_err(|error| {
        AuthApiError::bad_request(
            "malformed_json",
            format!("failed to parse request body: {error}"),
        )
    })
}

fn api_error_from_setup(error: SetupError) -> AuthApiError {
    let (status, reason_code) = match &error {
        SetupError::MissingFields(_) => (StatusCode::BAD_REQUEST, "missing_fields"),
        SetupError::PasswordTooShort => (StatusCode::BAD_REQUEST, "password_too_short"),
        SetupError::InvalidOrExpiredCapability => {
            (StatusCode::UNAUTHORIZED, "invalid_or_expired_capability")
        }
        SetupError::InvalidAccessCode => (StatusCode::UNAUTHORIZED, "invalid_access_code"),
        SetupError::UserNotFound => (StatusCode::NOT_FOUND, "user_not_found"),
        SetupError::UpstreamUpdateFailure(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "upstream_update_failure")
        }
        SetupError::DispatchFailure(_) => (StatusCode::INTERNAL_SERVER_ERROR, "dispatch_failure"),
    };
    if status.is_server_error() {
        tracing::warn!(reason_code, detail = ?error, "onboarding request failed");
    }
    AuthApiError::new(status, reason_code, error.to_string())
}

async fn handle_send_code(
    State(state): State<Arc<OnboardingGatewayState>>,
    body: Bytes,
) -> Response {
    state.record_request();
    let request = match parse_json_body::<SendCodeRequest>(&body) {
        Ok(request) => request,
        Err(error) => {
            state.record_reason("send_code_malformed_json");
            return error.into_response();
        }
    };
    match state.config.service.request_code(&request.email).await {
        Ok(()) => {
            state.record_reason("send_code_succeeded");
            (StatusCode::OK, Json(json!({"success": true}))).into_response()
        }
        Err(error) => {
            let error = api_error_from_setup(error);
            state.record_reason(error.reason_code());
            error.into_response()
        }
    }
}

async fn handle_lookup_user(
    State(state): State<Arc<OnboardingGatewayState>>,
    body: Bytes,
) -> Response {
    state.record_request();
    let request = match parse_json_body::<LookupUserRequest>(&body) {
        Ok(request) => request,
        Err(error) => {
            state.record_reason("lookup_user_malformed_json");
            return error.into_response();
        }
    };
    match state.config.service.lookup(&request.email).await {
        Ok(status) => {
            state.record_reason("lookup_user_succeeded");
            (
                StatusCode::OK,
                Json(LookupResponse {
                    status: status.as_str(),
                    email: status.email().map(str::to_string),
                }),
            )
                .into_response()
        }
        Err(error) => {
            let error = api_error_from_setup(error);
            state.record_reason(error.reason_code());
            error.into_response()
        }
    }
}

async fn handle_complete_setup_code(
    State(state): State<Arc<OnboardingGatewayState>>,
    body: Bytes,
) -> Response {
    state.record_request();
    let request = match parse_json_body::<CompleteSetupCodeRequest>(&body) {
        Ok(request) => request,
        Err(error) => {
            state.record_reason("complete_setup_code_malformed_json");
            return error.into_response();
        }
    };
    match state
        .config
        .service
        .complete_with_code(&request.email, &request.code, &request.password)
        .await
    {
        Ok(()) => {
            state.record_reason("complete_setup_code_succeeded");
            (StatusCode::OK, Json(json!({"success": true}))).into_response()
        }
        Err(error) => {
            let error = api_error_from_setup(error);
            state.record_reason(error.reason_code());
            error.into_response()
        }
    }
}

async fn handle_verify_invite(
    State(state): State<Arc<OnboardingGatewayState>>,
    body: Bytes,
) -> Response {
    state.record_request();
    let request = match parse_json_body::<VerifyInviteRequest>(&body) {
        Ok(request) => request,
        Err(error) => {
            state.record_reason("verify_invite_malformed_json");
            return error.into_response();
        }
    };
    match state.config.service.verify_invite(&request.token).await {
        Ok(payload) => {
            state.record_reason("verify_invite_succeeded");
            (
                StatusCode::OK,
                Json(VerifyInviteResponse {
                    email: payload.email,
                }),
            )
                .into_response()
        }
        Err(error) => {
            let error = api_error_from_setup(error);
            state.record_reason(error.reason_code());
            error.into_response()
        }
    }
}

async fn handle_complete_setup(
    State(state): State<Arc<OnboardingGatewayState>>,
    body: Bytes,
) -> Response {
    state.record_request();
    let request = match parse_json_body::<CompleteSetupRequest>(&body) {
        Ok(request) => request,
        Err(error) => {
            state.record_reason("complete_setup_malformed_json");
            return error.into_response();
        }
    };
    match state
        .config
        .service
        .complete_with_token(&request.token, &request.password)
        .await
    {
        Ok(()) => {
            state.record_reason("complete_setup_succeeded");
            (StatusCode::OK, Json(json!({"success": true}))).into_response()
        }
        Err(error) => {
            let error = api_error_from_setup(error);
            state.record_reason(error.reason_code());
            error.into_response()
        }
    }
}
