//! Admin area: user management

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;
use uuid::Uuid;

use crate::middleware::CurrentUser;
use crate::models::IdentityPublic;
use crate::utils::{AppError, AppResult};
use crate::AppState;

/// GET /admin/users
pub async fn list_users(State(state): State<AppState>) -> AppResult<Json<Vec<IdentityPublic>>> {
    let users = state.auth.credentials.list_users().await?;
    Ok(Json(users.iter().map(IdentityPublic::from).collect()))
}

/// DELETE /admin/users/{id}
///
/// Sessions of the deleted user fall back to anonymous on their next request.
pub async fn delete_user(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    if id == admin.id {
        return Err(AppError::BadRequest("You cannot delete your own account".to_string()));
    }

    if !state.auth.credentials.delete_user(id).await? {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    info!(admin_id = %admin.id, user_id = %id, "User deleted");
    Ok(StatusCode::NO_CONTENT)
}
