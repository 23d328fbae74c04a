//! Per-token maintenance port used by batch jobs.

use async_trait::async_trait;
use serde::Serialize;

use super::TokenError;

/// Outcome of a usage refresh for one token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageCheck {
    pub ok: bool,
    /// Stable code when the check failed (e.g. `cloudflare_challenge`).
    pub error_code: Option<String>,
    pub message: Option<String>,
}

impl UsageCheck {
    pub const fn ok() -> Self {
        Self {
            ok: true,
            error_code: None,
            message: None,
        }
    }

    pub fn failed(error_code: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error_code: error_code.map(ToString::to_string),
            message: Some(message.into()),
        }
    }

    /// Whether the failure was a bot-protection challenge.
    pub fn is_challenge(&self) -> bool {
        self.error_code.as_deref() == Some("cloudflare_challenge")
    }
}

/// Outcome of enabling NSFW mode for one token.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NsfwOutcome {
    pub success: bool,
    #[serde(flatten)]
    pub detail: serde_json::Map<String, serde_json::Value>,
}

/// Port for maintenance calls made against individual tokens.
#[async_trait]
pub trait TokenMaintenance: Send + Sync {
    /// Query the upstream for this token's usage / validity.
    async fn refresh_usage(&self, token: &str) -> Result<UsageCheck, TokenError>;

    /// Turn on NSFW mode for this token.
    async fn enable_nsfw(&self, token: &str) -> Result<NsfwOutcome, TokenError>;
}
