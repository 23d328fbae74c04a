//! Upstream request policy: proxy normalisation and the impersonation
//! fallback.
//!
//! Some proxies break TLS when the client impersonates a browser
//! fingerprint. That failure has a recognisable message; when it shows up
//! with both a browser profile and a proxy configured, the request is retried
//! exactly once without impersonation.

use std::fmt::Display;
use std::future::Future;

use thiserror::Error;

/// Errors from the upstream HTTP transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connecting, TLS or I/O failed before a response arrived.
    #[error("Request failed: {0}")]
    Request(String),

    /// The upstream answered with a non-success status.
    #[error("Upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body could not be decoded.
    #[error("Invalid upstream response: {0}")]
    Decode(String),
}

/// Proxy endpoints per scheme.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Proxies {
    pub http: Option<String>,
    pub https: Option<String>,
}

impl Proxies {
    /// Same proxy for both schemes.
    pub fn all(url: &str) -> Option<Self> {
        normalize_proxies(Some(url), Some(url))
    }
}

/// Trim entries and drop blanks; `None` when nothing is left.
pub fn normalize_proxies(http: Option<&str>, https: Option<&str>) -> Option<Proxies> {
    let clean = |v: Option<&str>| {
        v.map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
    };
    let proxies = Proxies {
        http: clean(http),
        https: clean(https),
    };
    (proxies.http.is_some() || proxies.https.is_some()).then_some(proxies)
}

/// The TLS failure a proxy produces against an impersonated handshake.
pub fn is_tls_proxy_impersonation_error(message: &str) -> bool {
    let msg = message.to_lowercase();
    msg.contains("curl: (35)") && msg.contains("tls connect error") && msg.contains("invalid library")
}

/// Whether `error` warrants one retry without impersonation.
pub fn should_retry_without_impersonate(
    error: &impl Display,
    browser: Option<&str>,
    proxies: Option<&Proxies>,
) -> bool {
    if browser.is_none_or(|b| b.trim().is_empty()) {
        return false;
    }
    if proxies.is_none_or(|p| p.http.is_none() && p.https.is_none()) {
        return false;
    }
    is_tls_proxy_impersonation_error(&error.to_string())
}

/// Run `request` with the browser profile, retrying once without it on the
/// proxy TLS failure. `request` receives the profile to use, if any.
pub async fn request_with_impersonation_fallback<T, E, F, Fut>(
    browser: Option<&str>,
    proxies: Option<&Proxies>,
    label: &str,
    request: F,
) -> Result<T, E>
where
    E: Display,
    F: Fn(Option<&str>) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let profile = browser.filter(|b| !b.trim().is_empty());
    match request(profile).await {
        Ok(value) => Ok(value),
        Err(e) if should_retry_without_impersonate(&e, profile, proxies) => {
            tracing::warn!(
                label,
                browser = profile.unwrap_or_default(),
                "Proxy TLS incompatible with impersonation, retrying once without it"
            );
            request(None).await
        }
        Err(e) => Err(e),
    }
}
