//! Access-key gates.
//!
//! Plain bearer equality against configured keys. Admin routes need the
//! app key; `/v1` routes need the API key when `auth_required` is on;
//! public imagine routes need the public key when one is set, are
//! open when `public_enabled` is on without a key, and closed otherwise.

use aigw_core::settings::AuthSettings;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::HttpError;
use crate::state::AppState;

pub(crate) fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

fn compare(expected: &str, presented: Option<&str>) -> Result<(), HttpError> {
    match presented {
        None => Err(HttpError::Unauthorized(
            "Missing authentication token".to_string(),
        )),
        Some(key) if key == expected => Ok(()),
        Some(_) => Err(HttpError::Unauthorized(
            "Invalid authentication token".to_string(),
        )),
    }
}

/// Check a presented public key (header or query) against the settings.
pub fn check_public_key(auth: &AuthSettings, presented: Option<&str>) -> Result<(), HttpError> {
    match auth.public_key() {
        Some(expected) => compare(expected, presented),
        None if auth.public_enabled => Ok(()),
        None => Err(HttpError::Unauthorized(
            "Public access is disabled".to_string(),
        )),
    }
}

/// Check a presented admin key. An unset app key locks the admin surface.
pub fn check_app_key(auth: &AuthSettings, presented: Option<&str>) -> Result<(), HttpError> {
    match auth.app_key() {
        Some(expected) => compare(expected, presented),
        None => Err(HttpError::Unauthorized(
            "App key is not configured".to_string(),
        )),
    }
}

/// Check a presented API key. Off unless `auth_required`; a required but
/// unset key is a server misconfiguration, not a client error.
pub fn check_api_key(auth: &AuthSettings, presented: Option<&str>) -> Result<(), HttpError> {
    if !auth.auth_required {
        return Ok(());
    }
    match auth.api_key() {
        Some(expected) => compare(expected, presented),
        None => Err(HttpError::ServiceUnavailable(
            "API authentication is enabled but app.api_key is empty".to_string(),
        )),
    }
}

pub async fn require_app_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, HttpError> {
    if let Err(e) = check_app_key(&state.settings.auth, bearer(req.headers())) {
        tracing::warn!(path = %req.uri().path(), "Unauthorized admin request");
        return Err(e);
    }
    Ok(next.run(req).await)
}

pub async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, HttpError> {
    check_api_key(&state.settings.auth, bearer(req.headers()))?;
    Ok(next.run(req).await)
}

pub async fn require_public_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, HttpError> {
    check_public_key(&state.settings.auth, bearer(req.headers()))?;
    Ok(next.run(req).await)
}
