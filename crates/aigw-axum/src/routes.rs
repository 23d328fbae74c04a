//! Router configuration.
//!
//! Route groups carry their own access gates; the rate limiter, trace ids
//! and CORS wrap everything.

use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};

use crate::bootstrap::CorsConfig;
use crate::handlers::{batch, images, imagine, imagine_ws, tokens};
use crate::middleware::{
    rate_limit, require_api_key, require_app_key, require_public_key, trace_requests,
};
use crate::state::AppState;

fn build_cors_layer(config: &CorsConfig) -> CorsLayer {
    match config {
        CorsConfig::AllowAll => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
        CorsConfig::AllowOrigins(origins) => {
            use axum::http::HeaderValue;
            let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            CorsLayer::new()
                .allow_origin(allowed)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    }
}

/// Imagine routes that need the public key when one is configured.
fn public_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/imagine/start", post(imagine::start))
        .route("/imagine/stop", post(imagine::stop))
        .route_layer(from_fn_with_state(state.clone(), require_public_key))
}

/// Admin routes behind the app key.
fn admin_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/verify", get(tokens::verify))
        .route("/tokens/refresh", post(tokens::refresh))
        .route("/tokens/nsfw/enable", post(tokens::enable_nsfw))
        .route("/tokens/refresh/async", post(tokens::refresh_async))
        .route("/tokens/nsfw/enable/async", post(tokens::enable_nsfw_async))
        .route("/batch/{task_id}/cancel", post(batch::cancel))
        .route_layer(from_fn_with_state(state.clone(), require_app_key))
}

/// OpenAI-compatible routes behind the API key when `auth_required` is on.
fn api_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/images/generations", post(images::generations))
        .route_layer(from_fn_with_state(state.clone(), require_api_key))
}

/// Routes that check credentials themselves (query keys, session resume)
/// or need none.
fn open_routes() -> Router<AppState> {
    Router::new()
        .route("/imagine/sse", get(imagine::sse))
        .route("/imagine/ws", get(imagine_ws::imagine_ws))
        .route("/imagine/config", get(imagine::config))
        .route("/batch/{task_id}/stream", get(batch::stream))
}

/// Build the full gateway router.
pub fn create_router(state: AppState, cors_config: &CorsConfig) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(public_routes(&state))
        .merge(admin_routes(&state))
        .merge(api_routes(&state))
        .merge(open_routes())
        .layer(from_fn_with_state(state.clone(), rate_limit))
        .layer(from_fn(trace_requests))
        .layer(build_cors_layer(cors_config))
        .with_state(state)
}

/// Health check endpoint.
pub(crate) async fn health_check() -> &'static str {
    "OK"
}
