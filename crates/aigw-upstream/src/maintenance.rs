//! `TokenMaintenance` over the upstream: usage check and NSFW toggle.

use aigw_core::ports::{NsfwOutcome, TokenError, TokenMaintenance, UsageCheck};
use aigw_core::transport::TransportError;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Map, Value, json};

use crate::client::UpstreamClient;

const CHALLENGE_MARKERS: [&str; 4] = [
    "just a moment",
    "cf-chl",
    "challenge-platform",
    "cf_clearance",
];

/// Whether an error response is a Cloudflare interstitial rather than an
/// answer from the upstream itself.
pub fn is_cloudflare_challenge(status: u16, body: &str) -> bool {
    if !matches!(status, 403 | 429 | 503) {
        return false;
    }
    let body = body.to_lowercase();
    CHALLENGE_MARKERS.iter().any(|m| body.contains(m))
}

fn usage_failure(error: TransportError) -> Result<UsageCheck, TokenError> {
    match error {
        TransportError::Status { status, body } if is_cloudflare_challenge(status, &body) => {
            Ok(UsageCheck::failed(
                Some("cloudflare_challenge"),
                format!("Upstream returned {status} with a Cloudflare challenge"),
            ))
        }
        TransportError::Status { status: 401, .. } => Ok(UsageCheck::failed(
            Some("invalid_token"),
            "Token rejected by upstream",
        )),
        e @ TransportError::Status { .. } => Ok(UsageCheck::failed(None, e.to_string())),
        e => Err(TokenError::Upstream(e.to_string())),
    }
}

#[async_trait]
impl TokenMaintenance for UpstreamClient {
    async fn refresh_usage(&self, token: &str) -> Result<UsageCheck, TokenError> {
        match self
            .send(Method::GET, self.usage_path(), token, None, false)
            .await
        {
            Ok(_) => Ok(UsageCheck::ok()),
            Err(e) => usage_failure(e),
        }
    }

    async fn enable_nsfw(&self, token: &str) -> Result<NsfwOutcome, TokenError> {
        let Some(path) = self.nsfw_path() else {
            return Err(TokenError::Unsupported(
                "no NSFW endpoint configured".to_string(),
            ));
        };

        let body = json!({ "enabled": true });
        match self.send(Method::POST, path, token, Some(&body), false).await {
            Ok(response) => {
                let detail = match response.json::<Value>().await {
                    Ok(Value::Object(map)) => map,
                    _ => Map::new(),
                };
                Ok(NsfwOutcome {
                    success: true,
                    detail,
                })
            }
            Err(TransportError::Status { status, body }) => {
                let mut detail = Map::new();
                detail.insert("status".into(), json!(status));
                detail.insert("error".into(), json!(body));
                Ok(NsfwOutcome {
                    success: false,
                    detail,
                })
            }
            Err(e) => Err(TokenError::Upstream(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_detection() {
        let page = "<html><title>Just a moment...</title></html>";
        assert!(is_cloudflare_challenge(403, page));
        assert!(is_cloudflare_challenge(503, "window._cf_chl_opt cf-chl"));
        assert!(!is_cloudflare_challenge(403, "forbidden"));
        assert!(!is_cloudflare_challenge(200, page));
    }

    #[test]
    fn test_usage_failure_classification() {
        let check = usage_failure(TransportError::Status {
            status: 403,
            body: "Just a moment".into(),
        })
        .unwrap();
        assert!(check.is_challenge());

        let check = usage_failure(TransportError::Status {
            status: 401,
            body: String::new(),
        })
        .unwrap();
        assert_eq!(check.error_code.as_deref(), Some("invalid_token"));

        assert!(usage_failure(TransportError::Request("refused".into())).is_err());
    }
}
