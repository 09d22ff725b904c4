use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::Error;

/// Errors returned by the JSON auth endpoints.
///
/// Only [`code`](AuthError::code) reaches the browser; details are logged.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Missing or malformed request field.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// One-time code unknown, wrong or expired.
    #[error("Invalid or expired code")]
    InvalidCode,

    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Upstream refused to create the customer.
    #[error("Signup rejected: {}", .0.join("; "))]
    SignupRejected(Vec<String>),

    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Code delivery failed: {0}")]
    Delivery(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// Stable reason code sent to the client.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidCode => "invalid_code",
            Self::InvalidCredentials => "invalid_credentials",
            Self::SignupRejected(_) => "signup_rejected",
            Self::Unauthenticated => "not_authenticated",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::Delivery(_) => "delivery_failed",
            Self::Internal(_) | Self::Config(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::InvalidCode | Self::SignupRejected(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::InvalidCredentials | Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Delivery(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Auth request failed");
        }
        (status, Json(json!({ "error": self.code() }))).into_response()
    }
}

impl From<Error> for AuthError {
    fn from(e: Error) -> Self {
        if e.is_unavailable() {
            return Self::UpstreamUnavailable(e.to_string());
        }
        match e {
            Error::Validation(msg) => Self::InvalidRequest(msg),
            Error::UpstreamValidation(errors) => Self::SignupRejected(errors),
            Error::NoSession => Self::Unauthenticated,
            Error::Delivery(msg) => Self::Delivery(msg),
            Error::Config(msg) => Self::Config(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}
