//! Event vocabulary shared by the WebSocket and SSE transports.

use serde::{Serialize, Serializer};

use crate::ports::ProviderEvent;

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    QuantityReached,
    Stopped,
    Error,
}

/// `type: status` payloads, tagged by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Running {
        prompt: String,
        aspect_ratio: String,
        run_id: String,
        target_count: u32,
        batch_size: u32,
    },
    RoundDone {
        run_id: String,
        round: u32,
        generated_count: u32,
        target_count: u32,
        request_n: u32,
    },
    Stopped {
        run_id: String,
        reason: StopReason,
        generated_count: u32,
        target_count: u32,
    },
}

/// A finished image synthesized from a list-mode result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImagePayload {
    pub b64_json: String,
    /// 1-based within the run.
    pub sequence: u32,
    /// Milliseconds since the epoch.
    pub created_at: i64,
    pub aspect_ratio: String,
    pub run_id: String,
}

/// An in-stream error. The run continues unless it says otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub message: String,
    pub code: String,
}

impl ErrorPayload {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.to_string(),
        }
    }
}

/// One frame on an imagine transport.
#[derive(Debug, Clone, PartialEq)]
pub enum ImagineEvent {
    Status(RunStatus),
    Image(ImagePayload),
    Error(ErrorPayload),
    /// A provider chunk forwarded as-is (with `run_id` filled in).
    Upstream(ProviderEvent),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Tagged<'a> {
    Status(&'a RunStatus),
    Image(&'a ImagePayload),
    Error(&'a ErrorPayload),
}

impl Serialize for ImagineEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Status(status) => Tagged::Status(status).serialize(serializer),
            Self::Image(image) => Tagged::Image(image).serialize(serializer),
            Self::Error(error) => Tagged::Error(error).serialize(serializer),
            Self::Upstream(event) => event.serialize(serializer),
        }
    }
}

impl ImagineEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload::new(code, message))
    }

    /// Whether this is the terminal `stopped` status.
    pub const fn is_stopped(&self) -> bool {
        matches!(self, Self::Status(RunStatus::Stopped { .. }))
    }

    /// The error code, for `error` events.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Error(e) => Some(&e.code),
            _ => None,
        }
    }

    /// JSON text for one transport frame.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to serialize imagine event");
            r#"{"type":"error","message":"serialization failed","code":"internal_error"}"#
                .to_string()
        })
    }
}
