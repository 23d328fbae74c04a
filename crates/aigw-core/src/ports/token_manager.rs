//! Token pool port.
//!
//! Token selection, refresh and persistence internals live behind this trait.
//! Callers only draw a token for a pool, ask for a reload when state may be
//! stale, and persist after bulk maintenance.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by token backends.
#[derive(Debug, Error)]
pub enum TokenError {
    /// Persisting or loading token state failed.
    #[error("Token storage error: {0}")]
    Storage(String),

    /// The backend does not implement this operation.
    #[error("Unsupported token operation: {0}")]
    Unsupported(String),

    /// The upstream rejected or failed the maintenance call.
    #[error("Upstream error: {0}")]
    Upstream(String),
}

/// Auto-refresh pause state, reported back to admin clients.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RefreshState {
    pub paused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_until: Option<i64>,
}

/// Port for the token pool.
#[async_trait]
pub trait TokenManager: Send + Sync {
    /// Reload token state if the backing store changed.
    async fn reload_if_stale(&self) -> Result<(), TokenError>;

    /// Draw a usable token from the named pool, if any.
    async fn get_token(&self, pool: &str) -> Option<String>;

    /// Every token across every pool, in pool order.
    async fn list_tokens(&self) -> Vec<String>;

    /// Persist token state.
    async fn save(&self) -> Result<(), TokenError>;

    /// Suspend background refresh for a while.
    fn pause_auto_refresh(&self, duration: Duration, reason: &str);

    /// Current auto-refresh state.
    fn refresh_state(&self) -> RefreshState;
}

/// Draw a token by trying each candidate pool in order.
///
/// A failed reload is logged and does not prevent drawing from the
/// current state.
pub async fn acquire_token(tokens: &dyn TokenManager, candidates: &[String]) -> Option<String> {
    if let Err(e) = tokens.reload_if_stale().await {
        tracing::warn!(error = %e, "Token reload failed, using current pool state");
    }
    for pool in candidates {
        if let Some(token) = tokens.get_token(pool).await {
            return Some(token);
        }
    }
    None
}
