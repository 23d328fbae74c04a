//! Trace ids and request/response logging.

use std::time::Instant;

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{Instrument, info, info_span};

pub const TRACE_HEADER: &str = "x-trace-id";

const IGNORED_PATHS: [&str; 3] = ["/", "/imagine", "/health"];
const IGNORED_PREFIXES: [&str; 1] = ["/static/"];

/// Paths that are served without request/response log lines.
pub fn should_skip_logging(path: &str) -> bool {
    IGNORED_PATHS.contains(&path) || IGNORED_PREFIXES.iter().any(|p| path.starts_with(p))
}

/// Tag every request with a trace id, run it inside a span carrying that id
/// and echo the id back in `X-Trace-Id`.
pub async fn trace_requests(req: Request, next: Next) -> Response {
    let trace_id = uuid::Uuid::new_v4().to_string();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let quiet = should_skip_logging(&path);

    let span = info_span!("request", trace_id = %trace_id, %method, %path);
    let start = Instant::now();
    if !quiet {
        info!(parent: &span, "Request: {method} {path}");
    }

    let mut response = next.run(req).instrument(span.clone()).await;

    if !quiet {
        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            parent: &span,
            status = response.status().as_u16(),
            duration_ms,
            "Response: {method} {path}"
        );
    }
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_HEADER, value);
    }
    response
}
