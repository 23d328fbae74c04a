//! Request middleware: tracing, admission control and access keys.

pub mod auth;
pub mod rate_limit;
pub mod trace;

pub use auth::{check_public_key, require_api_key, require_app_key, require_public_key};
pub use rate_limit::rate_limit;
pub use trace::{TRACE_HEADER, trace_requests};
