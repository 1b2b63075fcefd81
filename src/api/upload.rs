//! Upload API
//!
//! Every route here sits behind the API key middleware and is exempt from
//! CSRF verification. The request body is the file itself; it is stored as
//! `<uuid>.<ext>` under the configured upload directory.

use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::middleware::ApiPrincipal;
use crate::utils::{AppError, AppResult};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct StoredFile {
    pub id: Uuid,
    pub name: String,
    pub original_name: Option<String>,
    pub content_type: String,
    pub size: usize,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub file: StoredFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadKind {
    Any,
    Image,
    Text,
}

/// POST /api/upload and /api/upload/file
pub async fn upload_file(
    state: State<AppState>,
    principal: ApiPrincipal,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<UploadResponse>> {
    store_upload(state, principal, headers, body, UploadKind::Any).await
}

/// POST /api/upload/image
pub async fn upload_image(
    state: State<AppState>,
    principal: ApiPrincipal,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<UploadResponse>> {
    store_upload(state, principal, headers, body, UploadKind::Image).await
}

/// POST /api/upload/text
pub async fn upload_text(
    state: State<AppState>,
    principal: ApiPrincipal,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<UploadResponse>> {
    store_upload(state, principal, headers, body, UploadKind::Text).await
}

async fn store_upload(
    State(state): State<AppState>,
    ApiPrincipal(owner): ApiPrincipal,
    headers: HeaderMap,
    body: Bytes,
    kind: UploadKind,
) -> AppResult<Json<UploadResponse>> {
    if body.is_empty() {
        return Err(AppError::BadRequest("No file was uploaded".to_string()));
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_else(|| "application/octet-stream".to_string());

    match kind {
        UploadKind::Image if !content_type.starts_with("image/") => {
            return Err(AppError::BadRequest("Only image uploads are accepted here".to_string()));
        }
        UploadKind::Text if std::str::from_utf8(&body).is_err() => {
            return Err(AppError::BadRequest("Text uploads must be valid UTF-8".to_string()));
        }
        _ => {}
    }

    let original_name = headers
        .get("x-filename")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let ext = extension_for(original_name.as_deref(), &content_type, kind);

    let id = Uuid::new_v4();
    let name = format!("{}.{}", id, ext);
    let directory = &state.config.uploads.directory;

    tokio::fs::create_dir_all(directory).await.map_err(|e| {
        error!(error = %e, dir = ?directory, "Failed to create upload directory");
        AppError::Internal(format!("Failed to create upload directory: {}", e))
    })?;
    tokio::fs::write(directory.join(&name), &body)
        .await
        .map_err(|e| {
            error!(error = %e, file = %name, "Failed to write upload");
            AppError::Internal(format!("Failed to write upload: {}", e))
        })?;

    info!(user_id = %owner.id, file = %name, size = body.len(), "File uploaded");

    Ok(Json(UploadResponse {
        success: true,
        file: StoredFile {
            id,
            name,
            original_name,
            content_type,
            size: body.len(),
            uploaded_by: owner.username.clone(),
            uploaded_at: Utc::now(),
        },
    }))
}

/// File extension for a stored upload.
///
/// A short alphanumeric extension from the client's filename wins; otherwise
/// it is derived from the content type.
fn extension_for(original_name: Option<&str>, content_type: &str, kind: UploadKind) -> String {
    if let Some((_, ext)) = original_name.and_then(|n| n.rsplit_once('.')) {
        if !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return ext.to_ascii_lowercase();
        }
    }

    match content_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "text/plain" => "txt",
        "text/markdown" => "md",
        "application/json" => "json",
        "application/pdf" => "pdf",
        _ if kind == UploadKind::Text => "txt",
        _ => "bin",
    }
    .to_string()
}
