//! Shared utilities

pub mod error;
pub mod tokens;

pub use error::{AppError, AppResult, ErrorResponse};

use axum::http::{header::ACCEPT, HeaderMap};

/// Whether the client asked for JSON rather than a page
pub fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json"))
}
