//! Gateway settings types and validation.
//!
//! Every field carries a default so a partial (or absent) configuration file
//! still yields a usable gateway. Loading from disk lives here as well since
//! it is plain `serde_json`; persistence and masking are handled elsewhere.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Default HTTP port for the gateway.
pub const DEFAULT_PORT: u16 = 8000;

/// Default model used by the imagine orchestrator.
pub const DEFAULT_IMAGE_MODEL: &str = "imagine-1.0";

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewaySettings {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub rate_limit: RateLimitSettings,
    pub imagine: ImagineSettings,
    pub batch: BatchSettings,
    pub upstream: UpstreamSettings,
    /// Token pools: pool name -> raw tokens.
    pub tokens: HashMap<String, Vec<String>>,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins; empty allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            cors_origins: Vec::new(),
        }
    }
}

/// Access keys for the admin, API and public surfaces.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuthSettings {
    /// Admin key for token management and batch control.
    pub app_key: Option<String>,
    /// Bearer key for the OpenAI-compatible `/v1` surface.
    pub api_key: Option<String>,
    /// Require `api_key` on `/v1` routes.
    pub auth_required: bool,
    /// Key for the public imagine endpoints. Empty means "no key".
    pub public_key: Option<String>,
    /// Open the public endpoints when no public key is configured.
    pub public_enabled: bool,
}

impl AuthSettings {
    /// Configured public key, treating blank strings as unset.
    pub fn public_key(&self) -> Option<&str> {
        self.public_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    /// Configured admin key, treating blank strings as unset.
    pub fn app_key(&self) -> Option<&str> {
        self.app_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }
}

/// Ingress rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitSettings {
    pub enabled: bool,
    /// Force limiting on when running in a production environment.
    pub enabled_in_production: bool,
    pub window_seconds: f64,
    pub default_limit_per_window: u32,
    /// Exact paths or `prefix*` wildcard rules; 0 disables limiting.
    pub route_limits: HashMap<String, u32>,
    pub include_prefixes: Vec<String>,
    pub exclude_prefixes: Vec<String>,
    pub trust_x_forwarded_for: bool,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            enabled_in_production: true,
            window_seconds: 60.0,
            default_limit_per_window: 120,
            route_limits: HashMap::new(),
            include_prefixes: vec!["/v1/".to_string()],
            exclude_prefixes: vec![
                "/v1/admin".to_string(),
                "/v1/files".to_string(),
                "/static/".to_string(),
            ],
            trust_x_forwarded_for: false,
        }
    }
}

impl RateLimitSettings {
    /// Whether limiting applies, given the detected environment.
    pub const fn is_active(&self, production: bool) -> bool {
        self.enabled || (production && self.enabled_in_production)
    }
}

/// Continuous generation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ImagineSettings {
    pub model_id: String,
    /// Token pools tried in order when drawing a token for the model.
    pub pool_candidates: Vec<String>,
    pub session_ttl_secs: u64,
    pub token_backoff_ms: u64,
    pub error_backoff_ms: u64,
    /// Default NSFW flag advertised to clients.
    pub nsfw_default: bool,
    /// Size thresholds clients use to tell final images from previews.
    pub final_min_bytes: u64,
    pub medium_min_bytes: u64,
}

impl Default for ImagineSettings {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_IMAGE_MODEL.to_string(),
            pool_candidates: vec!["basic".to_string(), "super".to_string()],
            session_ttl_secs: 600,
            token_backoff_ms: 2000,
            error_backoff_ms: 1500,
            nsfw_default: false,
            final_min_bytes: 0,
            medium_min_bytes: 0,
        }
    }
}

/// Background batch job settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BatchSettings {
    /// How long a finished task stays queryable.
    pub retention_secs: u64,
    /// Items processed in parallel per job.
    pub concurrency: usize,
    /// Idle interval before a stream emits a keepalive ping.
    pub keepalive_secs: u64,
    pub cf_challenge_pause_secs: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            retention_secs: 300,
            concurrency: 10,
            keepalive_secs: 15,
            cf_challenge_pause_secs: 900,
        }
    }
}

/// Upstream provider connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UpstreamSettings {
    pub base_url: String,
    /// Browser profile sent on the first attempt (impersonation).
    pub browser: Option<String>,
    pub proxy: Option<String>,
    pub usage_path: String,
    pub nsfw_path: Option<String>,
    pub timeout_secs: u64,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9000".to_string(),
            browser: None,
            proxy: None,
            usage_path: "/v1/models".to_string(),
            nsfw_path: None,
            timeout_secs: 120,
        }
    }
}

/// Settings validation / loading error.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Rate limit window must be at least 1 second, got {0}")]
    InvalidWindow(f64),

    #[error("Default rate limit must be at least 1")]
    InvalidDefaultLimit,

    #[error("Session TTL must be positive")]
    InvalidSessionTtl,

    #[error("Batch concurrency must be at least 1")]
    InvalidBatchConcurrency,

    #[error("Image model id cannot be empty")]
    EmptyModelId,

    #[error("Failed to read config {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse config {path}: {reason}")]
    Parse { path: String, reason: String },
}

impl GatewaySettings {
    /// Load settings from a JSON file, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|e| SettingsError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let settings: Self = serde_json::from_str(&raw).map_err(|e| SettingsError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        validate_settings(&settings)?;
        Ok(settings)
    }
}

/// Validate settings values.
pub fn validate_settings(settings: &GatewaySettings) -> Result<(), SettingsError> {
    if settings.rate_limit.window_seconds < 1.0 {
        return Err(SettingsError::InvalidWindow(
            settings.rate_limit.window_seconds,
        ));
    }
    if settings.rate_limit.default_limit_per_window == 0 {
        return Err(SettingsError::InvalidDefaultLimit);
    }
    if settings.imagine.session_ttl_secs == 0 {
        return Err(SettingsError::InvalidSessionTtl);
    }
    if settings.batch.concurrency == 0 {
        return Err(SettingsError::InvalidBatchConcurrency);
    }
    if settings.imagine.model_id.trim().is_empty() {
        return Err(SettingsError::EmptyModelId);
    }
    Ok(())
}

/// Detect a production deployment from `APP_ENV` / `ENV`.
pub fn is_production_env() -> bool {
    let env = std::env::var("APP_ENV")
        .or_else(|_| std::env::var("ENV"))
        .unwrap_or_default();
    matches!(env.trim().to_lowercase().as_str(), "prod" | "production")
}
