//! API key middleware for the upload API
//!
//! Rejections keep the body shape API clients already parse:
//! `{"auth":false,"success":false,"error":{"authorization":"..."}}`.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::info;

use crate::models::Identity;
use crate::services::ApiKeyError;
use crate::utils::AppError;
use crate::AppState;

/// Identity that owns the API key presented with the request
#[derive(Debug, Clone)]
pub struct ApiPrincipal(pub Arc<Identity>);

impl IntoResponse for ApiKeyError {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "auth": false,
                "success": false,
                "error": { "authorization": self.to_string() },
            })),
        )
            .into_response()
    }
}

/// API key middleware
pub async fn api_key_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiKeyError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .map(|v| v.to_str().unwrap_or_default().to_string());

    let owner = match state.auth.api_keys.verify(header.as_deref()).await {
        Ok(owner) => owner,
        Err(e) => {
            info!(path = %request.uri().path(), reason = %e, "API key rejected");
            return Err(e);
        }
    };

    request.extensions_mut().insert(ApiPrincipal(owner));
    Ok(next.run(request).await)
}

impl<S> FromRequestParts<S> for ApiPrincipal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ApiPrincipal>()
            .cloned()
            .ok_or_else(|| AppError::Unauthenticated("Invalid api key provided.".into()))
    }
}
