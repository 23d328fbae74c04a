//! Ingress admission control.
//!
//! [`SlidingWindowLimiter`] does the counting; the functions here decide
//! which requests are governed, which limit applies to a path and which
//! client a request belongs to.

mod limiter;

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use sha2::{Digest, Sha256};

pub use limiter::{Admission, DEFAULT_HIGH_WATER, SlidingWindowLimiter};

use crate::settings::RateLimitSettings;

/// Whether `path` falls under limiting: inside an include prefix and not
/// inside an exclude prefix.
pub fn path_is_limited(path: &str, settings: &RateLimitSettings) -> bool {
    let included = settings
        .include_prefixes
        .iter()
        .any(|p| path.starts_with(p.as_str()));
    let excluded = settings
        .exclude_prefixes
        .iter()
        .any(|p| path.starts_with(p.as_str()));
    included && !excluded
}

/// Resolve the per-window limit for `path`.
///
/// Exact rules win, then the longest matching `prefix*` rule, then the
/// default. A result of 0 means the path is not limited.
pub fn resolve_path_limit(path: &str, route_limits: &HashMap<String, u32>, default: u32) -> u32 {
    if let Some(limit) = route_limits.get(path) {
        return *limit;
    }
    route_limits
        .iter()
        .filter_map(|(rule, limit)| {
            let prefix = rule.strip_suffix('*')?;
            path.starts_with(prefix).then_some((prefix.len(), *limit))
        })
        .max_by_key(|(len, _)| *len)
        .map_or(default, |(_, limit)| limit)
}

/// Derive the limiter identity for a request.
///
/// A bearer credential yields `ak:` plus a truncated SHA-256 so the raw
/// credential never lands in the bucket map. Otherwise the client address
/// is used, taken from the first `X-Forwarded-For` entry only when that
/// header is trusted.
pub fn client_key(
    authorization: Option<&str>,
    forwarded_for: Option<&str>,
    peer: Option<IpAddr>,
    trust_forwarded: bool,
) -> String {
    if let Some(token) = authorization
        .map(str::trim)
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        let digest = format!("{:x}", Sha256::digest(token.as_bytes()));
        return format!("ak:{}", &digest[..16]);
    }

    if trust_forwarded
        && let Some(first) = forwarded_for
            .and_then(|h| h.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
    {
        return format!("ip:{first}");
    }

    match peer {
        Some(ip) => format!("ip:{ip}"),
        None => "ip:unknown".to_string(),
    }
}

/// Bucket key: one log per method, path and client.
pub fn bucket_key(method: &str, path: &str, client: &str) -> String {
    format!("{method}:{path}:{client}")
}

/// Window length from settings, never below one second.
pub fn window_duration(settings: &RateLimitSettings) -> Duration {
    Duration::from_secs_f64(settings.window_seconds.max(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(pairs: &[(&str, u32)]) -> HashMap<String, u32> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    #[test]
    fn test_exact_rule_beats_wildcard() {
        let limits = rules(&[("/v1/images/*", 5), ("/v1/images/generations", 2)]);
        assert_eq!(resolve_path_limit("/v1/images/generations", &limits, 120), 2);
        assert_eq!(resolve_path_limit("/v1/images/edits", &limits, 120), 5);
    }

    #[test]
    fn test_longest_wildcard_wins() {
        let limits = rules(&[("/v1/*", 50), ("/v1/chat/*", 10)]);
        assert_eq!(resolve_path_limit("/v1/chat/completions", &limits, 120), 10);
        assert_eq!(resolve_path_limit("/v1/models", &limits, 120), 50);
        assert_eq!(resolve_path_limit("/health", &limits, 120), 120);
    }

    #[test]
    fn test_zero_limit_is_preserved() {
        let limits = rules(&[("/v1/models", 0)]);
        assert_eq!(resolve_path_limit("/v1/models", &limits, 120), 0);
    }

    #[test]
    fn test_path_gating_uses_prefixes() {
        let settings = RateLimitSettings::default();
        assert!(path_is_limited("/v1/images/generations", &settings));
        assert!(!path_is_limited("/v1/admin/tokens", &settings));
        assert!(!path_is_limited("/imagine/start", &settings));
    }

    #[test]
    fn test_client_key_hashes_bearer() {
        let key = client_key(Some("Bearer secret-token"), None, None, false);
        assert!(key.starts_with("ak:"));
        assert_eq!(key.len(), 3 + 16);
        assert!(!key.contains("secret"));
        assert_eq!(key, client_key(Some("Bearer secret-token"), None, None, false));
    }

    #[test]
    fn test_client_key_forwarded_only_when_trusted() {
        let peer: IpAddr = "10.0.0.1".parse().unwrap();
        let xff = Some("203.0.113.9, 10.0.0.2");

        assert_eq!(client_key(None, xff, Some(peer), true), "ip:203.0.113.9");
        assert_eq!(client_key(None, xff, Some(peer), false), "ip:10.0.0.1");
        assert_eq!(client_key(None, None, None, false), "ip:unknown");
        assert_eq!(client_key(Some("Bearer  "), None, Some(peer), false), "ip:10.0.0.1");
    }
}
