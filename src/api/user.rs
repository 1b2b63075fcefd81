//! Account routes under `/user`: signup, activation and password reset
//!
//! The whole group is for anonymous visitors only.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use super::{finish, finish_error};
use crate::middleware::{FormFields, RequestAuth};
use crate::models::{
    EmailRequest, FlashMessage, IdentityPublic, ResetPasswordRequest, SignupRequest,
};
use crate::utils::{wants_json, AppResult};
use crate::AppState;

/// POST /user/signup
pub async fn signup(
    State(state): State<AppState>,
    auth: RequestAuth,
    form: FormFields,
    headers: HeaderMap,
) -> AppResult<Response> {
    let request: SignupRequest = form.parse()?;

    match state.auth.accounts.signup(request).await {
        Ok(identity) if wants_json(&headers) => Ok((
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "user": IdentityPublic::from(&identity),
            })),
        )
            .into_response()),
        Ok(_) => Ok(finish(
            &state,
            &auth,
            &headers,
            StatusCode::CREATED,
            "/login",
            FlashMessage::success("Your account has been created. Check your email to activate it."),
        )
        .await),
        Err(e) => finish_error(&state, &auth, &headers, "/login", e).await,
    }
}

/// GET /user/activate/{token}
pub async fn activate(
    State(state): State<AppState>,
    auth: RequestAuth,
    headers: HeaderMap,
    Path(token): Path<String>,
) -> AppResult<Response> {
    match state.auth.accounts.activate(&token).await {
        Ok(_) => Ok(finish(
            &state,
            &auth,
            &headers,
            StatusCode::OK,
            "/login",
            FlashMessage::success("Your account has been activated. You can now login."),
        )
        .await),
        Err(e) => finish_error(&state, &auth, &headers, "/login", e).await,
    }
}

/// POST /user/activate/resend
pub async fn resend_activation(
    State(state): State<AppState>,
    auth: RequestAuth,
    form: FormFields,
    headers: HeaderMap,
) -> AppResult<Response> {
    let request: EmailRequest = form.parse()?;
    state.auth.accounts.resend_activation(&request.email).await?;

    Ok(finish(
        &state,
        &auth,
        &headers,
        StatusCode::OK,
        "/login",
        FlashMessage::info(
            "If that account exists and is not activated yet, a new activation email has been sent.",
        ),
    )
    .await)
}

/// POST /user/forgot
pub async fn forgot_password(
    State(state): State<AppState>,
    auth: RequestAuth,
    form: FormFields,
    headers: HeaderMap,
) -> AppResult<Response> {
    let request: EmailRequest = form.parse()?;
    state.auth.accounts.forgot_password(&request.email).await?;

    Ok(finish(
        &state,
        &auth,
        &headers,
        StatusCode::OK,
        "/login",
        FlashMessage::info("If that account exists, a password reset email has been sent."),
    )
    .await)
}

/// GET /user/reset/{token}
///
/// Only reached with a live token.
pub async fn reset_form(Path(token): Path<String>) -> Json<serde_json::Value> {
    Json(json!({ "page": "reset", "token": token }))
}

/// POST /user/reset/{token}
pub async fn reset_password(
    State(state): State<AppState>,
    auth: RequestAuth,
    form: FormFields,
    headers: HeaderMap,
    Path(token): Path<String>,
) -> AppResult<Response> {
    let request: ResetPasswordRequest = form.parse()?;

    match state
        .auth
        .accounts
        .reset_password(&token, &request.password)
        .await
    {
        Ok(()) => Ok(finish(
            &state,
            &auth,
            &headers,
            StatusCode::OK,
            "/login",
            FlashMessage::success("Your password has been changed. You can now login."),
        )
        .await),
        Err(e) => {
            let location = format!("/user/reset/{}", token);
            finish_error(&state, &auth, &headers, &location, e).await
        }
    }
}
