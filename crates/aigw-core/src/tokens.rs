//! In-memory token pool.
//!
//! Round-robins over the tokens configured per pool. Persistence is a no-op;
//! the pool lives as long as the process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::ports::{RefreshState, TokenError, TokenManager};

/// Strip the cookie-style `sso=` prefix some clients paste.
pub fn normalize_token(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed.strip_prefix("sso=").unwrap_or(trimmed)
}

/// Mask a token for display: `first8...last8` for tokens over 20 chars.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() > 20 {
        let head: String = chars[..8].iter().collect();
        let tail: String = chars[chars.len() - 8..].iter().collect();
        format!("{head}...{tail}")
    } else {
        token.to_string()
    }
}

struct Pool {
    tokens: Vec<String>,
    cursor: AtomicUsize,
}

/// Token pool loaded once from configuration.
pub struct StaticTokenPool {
    pools: Vec<(String, Pool)>,
    refresh: Mutex<RefreshState>,
}

impl StaticTokenPool {
    /// Build from pool name -> tokens. Pools are ordered by name.
    pub fn new(config: &HashMap<String, Vec<String>>) -> Self {
        let mut names: Vec<&String> = config.keys().collect();
        names.sort();
        let pools = names
            .into_iter()
            .map(|name| {
                let tokens = config[name]
                    .iter()
                    .map(|t| normalize_token(t).to_string())
                    .filter(|t| !t.is_empty())
                    .collect();
                (
                    name.clone(),
                    Pool {
                        tokens,
                        cursor: AtomicUsize::new(0),
                    },
                )
            })
            .collect();
        Self {
            pools,
            refresh: Mutex::new(RefreshState::default()),
        }
    }

    /// Total number of tokens across all pools.
    pub fn len(&self) -> usize {
        self.pools.iter().map(|(_, p)| p.tokens.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TokenManager for StaticTokenPool {
    async fn reload_if_stale(&self) -> Result<(), TokenError> {
        Ok(())
    }

    async fn get_token(&self, pool: &str) -> Option<String> {
        let (_, pool) = self.pools.iter().find(|(name, _)| name == pool)?;
        if pool.tokens.is_empty() {
            return None;
        }
        let index = pool.cursor.fetch_add(1, Ordering::Relaxed) % pool.tokens.len();
        Some(pool.tokens[index].clone())
    }

    async fn list_tokens(&self) -> Vec<String> {
        self.pools
            .iter()
            .flat_map(|(_, p)| p.tokens.iter().cloned())
            .collect()
    }

    async fn save(&self) -> Result<(), TokenError> {
        Ok(())
    }

    fn pause_auto_refresh(&self, duration: Duration, reason: &str) {
        let until = chrono::Utc::now()
            + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
        let mut state = self.refresh.lock().unwrap_or_else(PoisonError::into_inner);
        *state = RefreshState {
            paused: true,
            reason: Some(reason.to_string()),
            paused_until: Some(until.timestamp()),
        };
        tracing::warn!(reason, seconds = duration.as_secs(), "Token auto-refresh paused");
    }

    fn refresh_state(&self) -> RefreshState {
        self.refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
