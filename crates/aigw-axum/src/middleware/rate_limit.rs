//! Sliding-window admission control for the ingress path.

use std::net::SocketAddr;

use aigw_core::rate_limit::{
    bucket_key, client_key, path_is_limited, resolve_path_limit, window_duration,
};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::HttpError;
use crate::state::AppState;

/// Admit or reject a request against its (method, path, client) bucket.
///
/// Paths outside the configured prefixes, and routes whose resolved limit
/// is 0, pass straight through.
pub async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if !state.rate_limit_active {
        return next.run(req).await;
    }
    let settings = &state.settings.rate_limit;
    let path = req.uri().path().to_string();
    if !path_is_limited(&path, settings) {
        return next.run(req).await;
    }
    let limit = resolve_path_limit(
        &path,
        &settings.route_limits,
        settings.default_limit_per_window,
    );
    if limit == 0 {
        return next.run(req).await;
    }

    let headers = req.headers();
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());
    let client = client_key(
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok()),
        headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()),
        peer,
        settings.trust_x_forwarded_for,
    );
    let key = bucket_key(req.method().as_str(), &path, &client);

    let admission = state.limiter.allow(&key, limit, window_duration(settings));
    if admission.admitted {
        return next.run(req).await;
    }

    let retry_after = admission.retry_after_secs();
    tracing::warn!(%path, %client, limit, retry_after, "Rate limit exceeded");
    HttpError::rate_limited(retry_after).into_response()
}
