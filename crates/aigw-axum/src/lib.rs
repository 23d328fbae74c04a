//! Axum HTTP adapter for the aigw gateway.
//!
//! Wires the core engines behind REST, SSE and WebSocket routes:
//!
//! - `POST /imagine/start`, `POST /imagine/stop`, `GET /imagine/config`
//! - `GET /imagine/sse`, `GET /imagine/ws`
//! - `GET /batch/{task_id}/stream`, `POST /batch/{task_id}/cancel`
//! - `POST /tokens/refresh/async`, `POST /tokens/nsfw/enable/async`
//! - `POST /v1/images/generations`
//! - `GET /health`

pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

pub use bootstrap::{
    AxumContext, CorsConfig, GatewayPorts, ServerConfig, bootstrap, start_server,
};
pub use error::HttpError;
pub use routes::create_router;
pub use state::AppState;
