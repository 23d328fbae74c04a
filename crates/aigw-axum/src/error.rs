//! Axum-specific error types and mappings.
//!
//! Every failure renders as `{"error": {"message", "type", "code"}}` with a
//! matching status. Core and parameter errors map here so handlers can use
//! `?` throughout.

use aigw_core::ports::GenerationError;
use aigw_core::{CoreError, ParamError};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Axum-specific error type.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Invalid input.
    #[error("{message}")]
    BadRequest {
        message: String,
        code: &'static str,
        param: Option<&'static str>,
    },

    /// Missing or wrong credential.
    #[error("{0}")]
    Unauthorized(String),

    /// Resource not found.
    #[error("{0}")]
    NotFound(String),

    /// Admission rejected, or nothing left to serve the request with.
    #[error("{message}")]
    RateLimited {
        message: String,
        retry_after: Option<u64>,
    },

    /// The upstream failed or answered with nothing usable.
    #[error("{message}")]
    Upstream { message: String, code: &'static str },

    /// Service unavailable.
    #[error("{0}")]
    ServiceUnavailable(String),

    /// Internal server error.
    #[error("{0}")]
    Internal(String),
}

impl HttpError {
    pub fn bad_request(message: impl Into<String>, code: &'static str) -> Self {
        Self::BadRequest {
            message: message.into(),
            code,
            param: None,
        }
    }

    /// The admission rejection sent by the rate limiter.
    pub fn rate_limited(retry_after: u64) -> Self {
        Self::RateLimited {
            message: "Rate limit exceeded. Please retry later.".to_string(),
            retry_after: Some(retry_after),
        }
    }

    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    const fn error_type(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "invalid_request_error",
            Self::Unauthorized(_) => "authentication_error",
            Self::NotFound(_) => "not_found_error",
            Self::RateLimited { .. } => "rate_limit_exceeded",
            Self::Upstream { .. } => "upstream_error",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::Internal(_) => "server_error",
        }
    }

    const fn code(&self) -> &'static str {
        match self {
            Self::BadRequest { code, .. } | Self::Upstream { code, .. } => code,
            Self::Unauthorized(_) => "invalid_api_key",
            Self::NotFound(_) => "not_found",
            Self::RateLimited { .. } => "rate_limit_exceeded",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::Internal(_) => "internal_error",
        }
    }
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    message: String,
    #[serde(rename = "type")]
    error_type: &'a str,
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    param: Option<&'a str>,
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status();
        let param = match &self {
            Self::BadRequest { param, .. } => *param,
            _ => None,
        };
        let body = ErrorBody {
            error: ErrorDetail {
                message: self.to_string(),
                error_type: self.error_type(),
                code: self.code(),
                param,
            },
        };

        let mut response = (status, axum::Json(body)).into_response();
        match &self {
            Self::RateLimited {
                retry_after: Some(secs),
                ..
            } => {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(*secs));
            }
            Self::Unauthorized(_) => {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            _ => {}
        }
        response
    }
}

impl From<ParamError> for HttpError {
    fn from(err: ParamError) -> Self {
        Self::BadRequest {
            message: err.to_string(),
            code: err.code(),
            param: Some(err.param()),
        }
    }
}

impl From<CoreError> for HttpError {
    fn from(err: CoreError) -> Self {
        let code = err.code();
        match err {
            CoreError::Validation {
                message,
                code,
                param,
            } => Self::BadRequest {
                message,
                code,
                param,
            },
            CoreError::NotFound(msg) => Self::NotFound(msg),
            CoreError::Unavailable(msg) => Self::ServiceUnavailable(msg),
            e @ CoreError::NoToken => Self::RateLimited {
                message: e.to_string(),
                retry_after: None,
            },
            e @ CoreError::EmptyImage => Self::Upstream {
                message: e.to_string(),
                code,
            },
            CoreError::Generation(e) => e.into(),
            CoreError::Token(e) => Self::Internal(e.to_string()),
            CoreError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<GenerationError> for HttpError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Rejected(msg) | GenerationError::ModelNotSupported(msg) => {
                Self::BadRequest {
                    message: msg,
                    code: "invalid_request",
                    param: None,
                }
            }
            e => Self::Upstream {
                message: e.to_string(),
                code: "upstream_error",
            },
        }
    }
}
