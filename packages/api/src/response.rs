// ABOUTME: Shared API response envelope and error-to-status mapping
// ABOUTME: Every JSON endpoint answers with {success, data, error}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json as ResponseJson, Response},
};
use sandpit_sandbox::SandboxError;
use serde::Serialize;
use tracing::error;

/// Standard API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// HTTP status for each sandbox failure
pub fn status_for(err: &SandboxError) -> StatusCode {
    match err {
        SandboxError::Unauthenticated => StatusCode::UNAUTHORIZED,
        SandboxError::Forbidden(_) => StatusCode::FORBIDDEN,
        SandboxError::PoolExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
        SandboxError::ContainerUnavailable(_) => StatusCode::CONFLICT,
        SandboxError::InvalidPath(_) | SandboxError::InvalidCommand(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Sandbox error rendered in the response envelope
#[derive(Debug)]
pub struct ApiError(pub SandboxError);

impl From<SandboxError> for ApiError {
    fn from(err: SandboxError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "Internal server error".to_string()
        } else {
            self.0.to_string()
        };
        (status, ResponseJson(ApiResponse::<()>::error(message))).into_response()
    }
}

/// Wrap a result in the envelope, logging failures with `context`.
pub fn ok_or_error<T: Serialize>(result: sandpit_sandbox::Result<T>, context: &str) -> Response {
    match result {
        Ok(data) => (StatusCode::OK, ResponseJson(ApiResponse::success(data))).into_response(),
        Err(e) => {
            if status_for(&e).is_server_error() {
                error!("{}: {}", context, e);
            }
            ApiError(e).into_response()
        }
    }
}

pub fn not_found(message: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        ResponseJson(ApiResponse::<()>::error(message.to_string())),
    )
        .into_response()
}
