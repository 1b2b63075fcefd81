//! Member area: profile and API key management

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use tracing::info;

use super::auth::{page_view, PageView};
use crate::db::StoreError;
use crate::middleware::{CurrentUser, FormFields, RequestAuth};
use crate::models::{ApiKeyRecord, CreateApiKeyRequest, CreateApiKeyResponse};
use crate::utils::{AppError, AppResult};
use crate::AppState;

#[derive(Serialize)]
pub struct ProfileResponse {
    #[serde(flatten)]
    pub page: PageView,
    pub api_keys: Vec<ApiKeyRecord>,
}

/// GET /me
pub async fn profile(
    State(state): State<AppState>,
    auth: RequestAuth,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<ProfileResponse>> {
    let api_keys = state.auth.credentials.list_api_keys(user.id).await?;
    Ok(Json(ProfileResponse {
        page: page_view(&state, &auth, "me").await,
        api_keys,
    }))
}

/// GET /me/keys
pub async fn list_keys(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<Vec<ApiKeyRecord>>> {
    Ok(Json(state.auth.credentials.list_api_keys(user.id).await?))
}

/// POST /me/keys
///
/// The plaintext key is only ever returned by this call.
pub async fn create_key(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    form: FormFields,
) -> AppResult<(StatusCode, Json<CreateApiKeyResponse>)> {
    let request: CreateApiKeyRequest = form.parse()?;
    let name = request.name.trim();
    if name.is_empty() || name.len() > 100 {
        return Err(AppError::ValidationError(
            "Key name must be between 1 and 100 characters".to_string(),
        ));
    }

    let (api_key, key) = state
        .auth
        .api_keys
        .issue_key(user.id, name)
        .await
        .map_err(|e| match e {
            StoreError::Duplicate(_) => AppError::Conflict("Key collision, try again".to_string()),
            other => other.into(),
        })?;

    info!(user_id = %user.id, key_id = %api_key.id, "API key created");
    Ok((StatusCode::CREATED, Json(CreateApiKeyResponse { api_key, key })))
}
