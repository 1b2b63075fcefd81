//! Error types and handling
//!
//! Every request that fails in the access-control layer or in a handler ends
//! up as one of these variants. All of them are terminal for the request and
//! are converted into a consistent response: JSON for API callers, with
//! fixed bodies for CSRF and API key failures.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::db::StoreError;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    /// No or invalid credential (401)
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Authenticated but lacking privilege (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Missing or mismatched CSRF token (403)
    #[error("Invalid CSRF token")]
    InvalidCsrfToken,

    /// Quota for the current window exhausted (429)
    #[error("Rate limited")]
    RateLimited {
        /// Seconds until the current window closes
        retry_after_secs: u64,
    },

    /// Resource not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Conflict - resource already exists (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unprocessable entity - validation failed (422)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Payload larger than the configured limit (413)
    #[error("Payload too large")]
    PayloadTooLarge,

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Credential or session store failure (500)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Error response body
#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

/// Body returned when a state-mutating request fails CSRF verification.
///
/// The shape is fixed: `{"message":"NO CSRF TOKEN","error":{}}`.
#[derive(Serialize, Debug)]
pub struct CsrfErrorBody {
    pub message: &'static str,
    pub error: serde_json::Map<String, serde_json::Value>,
}

impl Default for CsrfErrorBody {
    fn default() -> Self {
        Self {
            message: "NO CSRF TOKEN",
            error: serde_json::Map::new(),
        }
    }
}

impl AppError {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::InvalidCsrfToken => StatusCode::FORBIDDEN,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Internal(_) | AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to the client
    pub fn public_message(&self) -> String {
        match self {
            AppError::Unauthenticated(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::Conflict(msg)
            | AppError::ValidationError(msg) => msg.clone(),
            AppError::InvalidCsrfToken => "NO CSRF TOKEN".to_string(),
            AppError::RateLimited { .. } => "Too many requests, please try again later.".to_string(),
            AppError::PayloadTooLarge => "Payload too large".to_string(),
            // Store and internal faults never leak their detail to the caller
            AppError::Internal(_) | AppError::Store(_) => "Something went wrong".to_string(),
        }
    }

    /// Whether the error is a server fault rather than a client mistake
    pub fn is_server_error(&self) -> bool {
        matches!(self, AppError::Internal(_) | AppError::Store(_))
    }

    fn error_type(&self) -> &'static str {
        match self {
            AppError::Unauthenticated(_) => "unauthenticated",
            AppError::Forbidden(_) => "forbidden",
            AppError::InvalidCsrfToken => "invalid_csrf_token",
            AppError::RateLimited { .. } => "rate_limited",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Conflict(_) => "conflict",
            AppError::ValidationError(_) => "validation_error",
            AppError::PayloadTooLarge => "payload_too_large",
            AppError::Internal(_) | AppError::Store(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::InvalidCsrfToken => {
                return (StatusCode::FORBIDDEN, Json(CsrfErrorBody::default())).into_response();
            }
            AppError::RateLimited { retry_after_secs } => {
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, retry_after_secs.to_string())],
                    self.public_message(),
                )
                    .into_response();
            }
            AppError::Forbidden(_) | AppError::Internal(_) | AppError::Store(_) => {
                error!(error = %self, error_type = self.error_type(), "Request error");
            }
            _ => {}
        }

        (
            self.status_code(),
            Json(ErrorResponse::new(self.error_type(), self.public_message())),
        )
            .into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::ValidationError(err.to_string())
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;
