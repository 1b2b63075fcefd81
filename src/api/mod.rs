//! HTTP routes and handlers
//!
//! This module assembles the router and the middleware chain around it.
//! Handlers are thin: page-style routes answer with a JSON view model (or a
//! `303` redirect carrying flash messages), and the upload API answers JSON.

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderMap, StatusCode},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::middleware::{
    api_key_middleware, csrf_middleware, form_fields_middleware, guard::redirect_with_flash,
    guard_middleware, rate_limit_middleware, session_middleware, GuardChain, GuardState,
    RequestAuth, RequireActivated, RequireAdmin, RequireAnonymous, RequireAuthenticated,
    RequireValidResetToken,
};
use crate::models::FlashMessage;
use crate::utils::{wants_json, AppError, ErrorResponse};
use crate::AppState;

mod admin;
mod auth;
mod health;
mod me;
mod upload;
mod user;

pub use health::*;

/// Build the application router with the full middleware chain
pub fn router(state: AppState) -> Router {
    let guarded = |chain: GuardChain| from_fn_with_state(GuardState::new(&state, chain), guard_middleware);

    let login_routes = Router::new()
        .route("/login", get(auth::login_page).post(auth::login))
        .route_layer(guarded(
            GuardChain::new().then(RequireAnonymous).then(RequireActivated),
        ));

    let reset_routes = Router::new()
        .route(
            "/reset/{token}",
            get(user::reset_form).post(user::reset_password),
        )
        .route_layer(guarded(GuardChain::new().then(RequireValidResetToken)));

    let user_routes = Router::new()
        .route("/signup", post(user::signup))
        .route("/activate/resend", post(user::resend_activation))
        .route("/activate/{token}", get(user::activate))
        .route("/forgot", post(user::forgot_password))
        .merge(reset_routes)
        .route_layer(guarded(GuardChain::new().then(RequireAnonymous)));

    let me_routes = Router::new()
        .route("/", get(me::profile))
        .route("/keys", get(me::list_keys).post(me::create_key))
        .route_layer(guarded(GuardChain::new().then(RequireAuthenticated)));

    let admin_routes = Router::new()
        .route("/users", get(admin::list_users))
        .route("/users/{id}", delete(admin::delete_user))
        .route_layer(guarded(
            GuardChain::new().then(RequireAuthenticated).then(RequireAdmin),
        ));

    let api_routes = Router::new()
        .route("/upload", post(upload::upload_file))
        .route("/upload/file", post(upload::upload_file))
        .route("/upload/image", post(upload::upload_image))
        .route("/upload/text", post(upload::upload_text))
        .route_layer(from_fn_with_state(state.clone(), api_key_middleware))
        .layer(DefaultBodyLimit::max(state.config.uploads.max_bytes));

    // Configure tracing for HTTP requests
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // Layers run outermost-last: trace, rate limit, session, form, csrf
    Router::new()
        .route("/", get(auth::index))
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness))
        .route("/csrf-token", get(auth::csrf_token))
        .route("/logout", post(auth::logout))
        .merge(login_routes)
        .nest("/user", user_routes)
        .nest("/me", me_routes)
        .nest("/admin", admin_routes)
        .nest("/api", api_routes)
        .fallback(not_found)
        .layer(from_fn_with_state(state.clone(), csrf_middleware))
        .layer(from_fn_with_state(state.clone(), form_fields_middleware))
        .layer(from_fn_with_state(state.clone(), session_middleware))
        .layer(from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(trace_layer)
        .with_state(state)
}

/// 404 handler: JSON for API clients, plain text otherwise
async fn not_found(headers: HeaderMap) -> Response {
    if wants_json(&headers) {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("not_found", "Not found")),
        )
            .into_response()
    } else {
        (StatusCode::NOT_FOUND, "Not Found").into_response()
    }
}

/// Finish a page-style form submission.
///
/// Browsers are redirected to `location` with `message` flashed; JSON
/// clients get the message and the location in the body.
pub(crate) async fn finish(
    state: &AppState,
    auth: &RequestAuth,
    headers: &HeaderMap,
    status: StatusCode,
    location: &str,
    message: FlashMessage,
) -> Response {
    if wants_json(headers) {
        (
            status,
            Json(json!({
                "success": status.is_success(),
                "messages": [message],
                "redirect": location,
            })),
        )
            .into_response()
    } else {
        redirect_with_flash(&state.auth, auth, location, vec![message]).await
    }
}

/// Turn a client-side handler error into a flashed redirect.
///
/// Server faults stay errors so they render the generic 500.
pub(crate) async fn finish_error(
    state: &AppState,
    auth: &RequestAuth,
    headers: &HeaderMap,
    location: &str,
    error: AppError,
) -> Result<Response, AppError> {
    if error.is_server_error() {
        return Err(error);
    }
    Ok(finish(
        state,
        auth,
        headers,
        error.status_code(),
        location,
        FlashMessage::error(error.public_message()),
    )
    .await)
}
