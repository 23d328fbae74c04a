//! Generation backend port.
//!
//! The backend answers one request either with a finite list of encoded
//! images or with a lazy stream of provider events. The orchestrator matches
//! on that tag once per round.

use std::fmt;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// One image generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub model_id: String,
    pub prompt: String,
    /// Number of images requested.
    pub n: u32,
    pub aspect_ratio: String,
    pub size: String,
    pub response_format: String,
    pub stream: bool,
    pub nsfw: Option<bool>,
}

/// A normalized provider event (one parsed SSE frame).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderEvent(pub Map<String, Value>);

impl ProviderEvent {
    /// Parse one SSE frame.
    ///
    /// `event:` names the type when the JSON payload has none; multiple
    /// `data:` lines are joined with `\n`. Returns `None` for empty frames,
    /// `[DONE]`, invalid JSON, and non-object payloads.
    pub fn from_sse_chunk(chunk: &str) -> Option<Self> {
        let mut event: Option<&str> = None;
        let mut data_lines: Vec<&str> = Vec::new();
        for raw in chunk.lines() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(name) = line.strip_prefix("event:") {
                event = Some(name.trim());
            } else if let Some(data) = line.strip_prefix("data:") {
                data_lines.push(data.trim());
            }
        }
        if data_lines.is_empty() {
            return None;
        }
        let data = data_lines.join("\n");
        if data == "[DONE]" {
            return None;
        }
        let Ok(Value::Object(mut payload)) = serde_json::from_str::<Value>(&data) else {
            return None;
        };
        if let Some(name) = event.filter(|n| !n.is_empty()) {
            payload
                .entry("type")
                .or_insert_with(|| Value::String(name.to_string()));
        }
        Some(Self(payload))
    }

    /// The `type` field, or an empty string.
    pub fn event_type(&self) -> &str {
        self.0.get("type").and_then(Value::as_str).unwrap_or("")
    }

    fn has_image_payload(&self) -> bool {
        ["b64_json", "url", "image"]
            .iter()
            .any(|key| self.0.get(*key).is_some_and(is_truthy))
    }

    /// Whether this event carries a finished image.
    ///
    /// Three independent markers are honored: an explicit completion type,
    /// an `image` type with payload, or a `final` stage with payload.
    // TODO: confirm against the provider's event schema which of the three markers it actually emits.
    pub fn is_final_image(&self) -> bool {
        match self.event_type() {
            "image_generation.completed" => return true,
            "image" if self.has_image_payload() => return true,
            _ => {}
        }
        let stage = self
            .0
            .get("stage")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_lowercase();
        stage == "final" && self.has_image_payload()
    }

    /// Set a field only when it is absent.
    pub fn set_default(&mut self, key: &str, value: impl Into<Value>) {
        self.0.entry(key).or_insert_with(|| value.into());
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(_) => true,
    }
}

/// Lazy stream of provider events.
pub type ProviderStream = BoxStream<'static, Result<ProviderEvent, GenerationError>>;

/// Result of a generation call.
pub enum GenerationOutput {
    /// A finite, ordered list of encoded images. Entries may be empty or the
    /// literal `"error"` for slots the backend failed to fill.
    Images(Vec<String>),
    /// A lazy sequence of provider events.
    Stream(ProviderStream),
}

impl fmt::Debug for GenerationOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Images(images) => f.debug_tuple("Images").field(&images.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Errors from the generation backend.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The upstream answered with a non-success status.
    #[error("Upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Connecting to or reading from the upstream failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The upstream answer could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The model cannot serve image requests.
    #[error("Model not supported: {0}")]
    ModelNotSupported(String),

    /// The request itself was refused; retrying cannot help.
    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl GenerationError {
    /// Returns true if retrying the same request may succeed.
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::ModelNotSupported(_) | Self::Rejected(_))
    }

    /// Stable error code for clients.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ModelNotSupported(_) => "model_not_supported",
            Self::Rejected(_) => "invalid_request",
            Self::Upstream { .. } | Self::Transport(_) | Self::Decode(_) => "internal_error",
        }
    }
}

/// Port for the image generation backend.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Generate images for `request` using `token`.
    async fn generate(
        &self,
        token: &str,
        request: ImageRequest,
    ) -> Result<GenerationOutput, GenerationError>;
}
