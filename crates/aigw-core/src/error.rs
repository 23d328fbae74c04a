//! Core error type for semantic domain errors.
//!
//! Adapters map this to their own error types (HTTP status codes, CLI exit
//! codes). Each variant carries a stable machine-readable code.

use thiserror::Error;

use crate::ports::{GenerationError, TokenError};

/// Canonical error type used across the core domain.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid input, rejected before any task or session is created.
    #[error("{message}")]
    Validation {
        message: String,
        code: &'static str,
        param: Option<&'static str>,
    },

    /// The requested entity was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A required collaborator is not available.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// No usable token in any candidate pool.
    #[error("No available tokens. Please try again later.")]
    NoToken,

    /// The backend answered without any usable image.
    #[error("Image generation returned empty data.")]
    EmptyImage,

    /// Token backend error.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Upstream generation failed.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// Unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Build a validation error.
    pub fn validation(message: impl Into<String>, code: &'static str) -> Self {
        Self::Validation {
            message: message.into(),
            code,
            param: None,
        }
    }

    /// Build a validation error naming the offending parameter.
    pub fn invalid_param(
        message: impl Into<String>,
        code: &'static str,
        param: &'static str,
    ) -> Self {
        Self::Validation {
            message: message.into(),
            code,
            param: Some(param),
        }
    }

    /// Stable error code for clients.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation { code, .. } => code,
            Self::NotFound(_) => "not_found",
            Self::Unavailable(_) => "service_unavailable",
            Self::NoToken => "rate_limit_exceeded",
            Self::EmptyImage => "empty_image",
            Self::Token(_) | Self::Internal(_) => "internal_error",
            Self::Generation(e) => e.code(),
        }
    }
}
