//! HTTP client for the upstream provider.
//!
//! Every call goes through [`UpstreamClient::send`], which applies the bearer
//! token, the browser profile header, and the impersonation fallback, and
//! turns non-success statuses into [`TransportError::Status`].

use std::time::Duration;

use aigw_core::settings::UpstreamSettings;
use aigw_core::transport::{Proxies, TransportError, request_with_impersonation_fallback};
use reqwest::{Client, Method, Proxy, Response};
use serde_json::Value;
use tracing::debug;

/// Header carrying the browser fingerprint profile for the egress proxy.
pub const IMPERSONATE_HEADER: &str = "x-impersonate";

/// Error bodies longer than this are truncated.
const MAX_ERROR_BODY: usize = 512;

/// reqwest-backed client for the configured upstream.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: Client,
    base_url: String,
    browser: Option<String>,
    proxies: Option<Proxies>,
    usage_path: String,
    nsfw_path: Option<String>,
}

impl UpstreamClient {
    /// Build a client from settings.
    pub fn new(settings: &UpstreamSettings) -> Result<Self, TransportError> {
        let proxies = settings.proxy.as_deref().and_then(Proxies::all);

        let mut builder = Client::builder().timeout(Duration::from_secs(settings.timeout_secs));
        if let Some(proxies) = &proxies {
            if let Some(url) = &proxies.http {
                builder = builder.proxy(
                    Proxy::http(url).map_err(|e| TransportError::Request(e.to_string()))?,
                );
            }
            if let Some(url) = &proxies.https {
                builder = builder.proxy(
                    Proxy::https(url).map_err(|e| TransportError::Request(e.to_string()))?,
                );
            }
        }
        let http = builder
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            browser: settings.browser.clone().filter(|b| !b.trim().is_empty()),
            proxies,
            usage_path: settings.usage_path.clone(),
            nsfw_path: settings.nsfw_path.clone().filter(|p| !p.trim().is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn usage_path(&self) -> &str {
        &self.usage_path
    }

    pub(crate) fn nsfw_path(&self) -> Option<&str> {
        self.nsfw_path.as_deref()
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    /// Send one request, retrying once without the browser profile when the
    /// proxy rejects the impersonated handshake.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        token: &str,
        body: Option<&Value>,
        accept_sse: bool,
    ) -> Result<Response, TransportError> {
        let url = self.url(path);
        request_with_impersonation_fallback(
            self.browser.as_deref(),
            self.proxies.as_ref(),
            path,
            |profile| {
                let mut request = self
                    .http
                    .request(method.clone(), &url)
                    .bearer_auth(token);
                if let Some(profile) = profile {
                    request = request.header(IMPERSONATE_HEADER, profile);
                }
                if accept_sse {
                    request = request.header(reqwest::header::ACCEPT, "text/event-stream");
                }
                if let Some(body) = body {
                    request = request.json(body);
                }
                let url = url.clone();
                let impersonate = profile.is_some();
                async move {
                    debug!(%url, impersonate, "Upstream request");
                    let response = request
                        .send()
                        .await
                        .map_err(|e| TransportError::Request(error_chain(&e)))?;
                    check_status(response).await
                }
            },
        )
        .await
    }
}

/// Flatten an error and its sources into one line.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

async fn check_status(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        body.truncate(cut);
    }
    Err(TransportError::Status {
        status: status.as_u16(),
        body,
    })
}
