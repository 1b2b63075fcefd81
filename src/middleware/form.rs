//! Form capture middleware
//!
//! Buffers url-encoded and JSON request bodies into a [`FormFields`]
//! extension so the CSRF check and guards can read `_csrf` and `email`
//! without consuming the body. The bytes are put back for the handler.
//! Upload paths exempt from CSRF are streamed and never buffered here.
//!
//! A body that cannot be captured is not rejected here: a [`FormRejection`]
//! is attached instead and reported after CSRF verification.

use std::collections::HashMap;

use axum::{
    body::{to_bytes, Body},
    extract::{FromRequestParts, Request, State},
    http::{header::CONTENT_TYPE, request::Parts, Method},
    middleware::Next,
    response::Response,
};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::utils::{AppError, AppResult};
use crate::AppState;

/// Largest form body that is buffered
pub const MAX_FORM_BYTES: usize = 64 * 1024;

/// Why a form body could not be captured
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormRejection {
    TooLarge,
    Malformed(String),
}

impl From<FormRejection> for AppError {
    fn from(rejection: FormRejection) -> Self {
        match rejection {
            FormRejection::TooLarge => AppError::PayloadTooLarge,
            FormRejection::Malformed(msg) => AppError::BadRequest(msg),
        }
    }
}

/// Flat view of the submitted form fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormFields(HashMap<String, String>);

impl FormFields {
    pub fn from_urlencoded(body: &[u8]) -> Self {
        Self(url::form_urlencoded::parse(body).into_owned().collect())
    }

    /// Top-level scalar members of a JSON object
    pub fn from_json(body: &[u8]) -> Result<Self, FormRejection> {
        if body.is_empty() {
            return Ok(Self::default());
        }
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| FormRejection::Malformed(format!("Malformed JSON body: {}", e)))?;
        let Value::Object(object) = value else {
            return Err(FormRejection::Malformed("Expected a JSON object".to_string()));
        };

        Ok(Self(
            object
                .into_iter()
                .filter_map(|(key, value)| match value {
                    Value::String(s) => Some((key, s)),
                    Value::Number(n) => Some((key, n.to_string())),
                    Value::Bool(b) => Some((key, b.to_string())),
                    _ => None,
                })
                .collect(),
        ))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Deserialize the fields into a request type
    pub fn parse<T: DeserializeOwned>(&self) -> AppResult<T> {
        let object = self
            .0
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        serde_json::from_value(Value::Object(object))
            .map_err(|e| AppError::BadRequest(format!("Invalid form: {}", e)))
    }
}

/// Methods that never change state
pub fn is_safe_method(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS
}

enum BodyKind {
    UrlEncoded,
    Json,
}

fn body_kind(request: &Request) -> Option<BodyKind> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())?;
    let mime = content_type.split(';').next()?.trim().to_ascii_lowercase();
    match mime.as_str() {
        "application/x-www-form-urlencoded" => Some(BodyKind::UrlEncoded),
        "application/json" => Some(BodyKind::Json),
        _ => None,
    }
}

/// Form capture middleware
pub async fn form_fields_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let skip = is_safe_method(request.method())
        || state
            .config
            .csrf
            .exempt_paths
            .iter()
            .any(|p| p == request.uri().path());

    let kind = if skip { None } else { body_kind(&request) };
    let Some(kind) = kind else {
        return next.run(request).await;
    };

    let (parts, body) = request.into_parts();
    let request = match to_bytes(body, MAX_FORM_BYTES).await {
        Ok(bytes) => {
            let fields = match kind {
                BodyKind::UrlEncoded => Ok(FormFields::from_urlencoded(&bytes)),
                BodyKind::Json => FormFields::from_json(&bytes),
            };
            let mut request = Request::from_parts(parts, Body::from(bytes));
            match fields {
                Ok(fields) => {
                    request.extensions_mut().insert(fields);
                }
                Err(rejection) => {
                    request.extensions_mut().insert(rejection);
                }
            }
            request
        }
        Err(_) => {
            let mut request = Request::from_parts(parts, Body::empty());
            request.extensions_mut().insert(FormRejection::TooLarge);
            request
        }
    };
    next.run(request).await
}

impl<S> FromRequestParts<S> for FormFields
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<FormFields>().cloned().unwrap_or_default())
    }
}
