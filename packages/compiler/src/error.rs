use std::time::Duration;

use axum::http::StatusCode;
use serde::Serialize;
use strum::{AsRefStr, Display};
use thiserror::Error;

use crate::models::FailureEnvelope;

/// Reasons the inbound payload was rejected. The display text is returned
/// to the caller verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Request body must be valid JSON")]
    MalformedBody,

    #[error("Request body too large. Maximum size is 10 MiB")]
    BodyTooLarge,

    #[error("Prompt is required in request body")]
    MissingPrompt,

    #[error("Prompt must be a string")]
    PromptNotString,

    #[error("Prompt cannot be empty")]
    EmptyPrompt,

    #[error("Prompt too long. Maximum length is 50,000 characters")]
    PromptTooLong,
}

/// Failures at the upstream provider boundary.
///
/// Provider-specific error codes are translated into these variants in
/// exactly one place (`upstream::client::translate_error`), so nothing
/// downstream ever sees a provider identifier.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream quota exhausted: {0}")]
    QuotaExceeded(String),

    #[error("upstream rejected the API key: {0}")]
    InvalidCredential(String),

    #[error("upstream rate limited the request")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("prompt exceeds the model context length: {0}")]
    ContextLengthExceeded(String),

    #[error("upstream request timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("upstream API error (status {status}): {message}")]
    Provider { status: u16, message: String },

    #[error("failed to parse upstream response: {0}")]
    MalformedResponse(String),

    #[error("upstream returned an empty completion")]
    EmptyResponse,
}

impl UpstreamError {
    /// Only a provider-side rate limit is worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, UpstreamError::RateLimited { .. })
    }
}

/// Every way a compile request can end without a result.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("upstream API key is not configured")]
    Configuration,

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("upstream response is not a valid result object: {0}")]
    Normalize(String),

    #[error("route {method} {path} not found")]
    NotFound { method: String, path: String },
}

pub type Result<T> = std::result::Result<T, CompileError>;

/// Stable, caller-visible error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
pub enum ErrorKind {
    ValidationError,
    RateLimitExceeded,
    ConfigurationError,
    QuotaExceeded,
    AuthenticationError,
    UpstreamRateLimit,
    ContentTooLong,
    NotFound,
    InternalError,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::ValidationError | ErrorKind::ContentTooLong => StatusCode::BAD_REQUEST,
            ErrorKind::RateLimitExceeded | ErrorKind::UpstreamRateLimit => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ErrorKind::QuotaExceeded => StatusCode::PAYMENT_REQUIRED,
            ErrorKind::AuthenticationError => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::ConfigurationError | ErrorKind::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Human-readable label placed in the `error` field of the envelope.
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "Validation Error",
            ErrorKind::RateLimitExceeded => "Rate limit exceeded",
            ErrorKind::ConfigurationError => "Configuration Error",
            ErrorKind::QuotaExceeded => "Quota Exceeded",
            ErrorKind::AuthenticationError => "Authentication Error",
            ErrorKind::UpstreamRateLimit => "Rate Limit Exceeded",
            ErrorKind::ContentTooLong => "Content Too Long",
            ErrorKind::NotFound => "Not Found",
            ErrorKind::InternalError => "Internal Server Error",
        }
    }
}

/// Result of running an error through the classification table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: StatusCode,
    pub kind: ErrorKind,
    pub message: String,
}

impl CompileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompileError::Validation(_) => ErrorKind::ValidationError,
            CompileError::RateLimited { .. } => ErrorKind::RateLimitExceeded,
            CompileError::Configuration => ErrorKind::ConfigurationError,
            CompileError::Upstream(e) => match e {
                UpstreamError::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
                UpstreamError::InvalidCredential(_) => ErrorKind::AuthenticationError,
                UpstreamError::RateLimited { .. } => ErrorKind::UpstreamRateLimit,
                UpstreamError::ContextLengthExceeded(_) => ErrorKind::ContentTooLong,
                UpstreamError::Timeout(_)
                | UpstreamError::Transport(_)
                | UpstreamError::Provider { .. }
                | UpstreamError::MalformedResponse(_)
                | UpstreamError::EmptyResponse => ErrorKind::InternalError,
            },
            CompileError::NotFound { .. } => ErrorKind::NotFound,
            CompileError::Normalize(_) => ErrorKind::InternalError,
        }
    }

    pub fn classify(&self) -> Classification {
        let kind = self.kind();
        let message = match (self, kind) {
            (CompileError::Validation(reason), _) => reason.to_string(),
            (CompileError::NotFound { method, path }, _) => {
                format!("Route {method} {path} not found")
            }
            (_, ErrorKind::RateLimitExceeded) => {
                "Too many requests. Please try again later.".to_string()
            }
            (_, ErrorKind::ConfigurationError) => "Upstream API key not configured. \
                 Please set OPENAI_API_KEY environment variable."
                .to_string(),
            (_, ErrorKind::QuotaExceeded) => {
                "Upstream API quota exceeded. Please check your billing details.".to_string()
            }
            (_, ErrorKind::AuthenticationError) => {
                "Invalid upstream API key. Please check your configuration.".to_string()
            }
            (_, ErrorKind::UpstreamRateLimit) => {
                "Upstream API rate limit exceeded. Please try again later.".to_string()
            }
            (_, ErrorKind::ContentTooLong) => "The prompt is too long for the model to process. \
                 Please shorten your request."
                .to_string(),
            _ => "An error occurred while processing your request. Please try again.".to_string(),
        };

        Classification {
            status: kind.status(),
            kind,
            message,
        }
    }

    /// Build the failure envelope. The internal error text is attached only
    /// for `InternalError` and only when `diagnostics` is on.
    pub fn to_envelope(&self, diagnostics: bool) -> FailureEnvelope {
        let Classification {
            status,
            kind,
            message,
        } = self.classify();

        let details = (diagnostics && kind == ErrorKind::InternalError).then(|| self.to_string());
        let retry_after = match self {
            CompileError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };

        FailureEnvelope {
            status,
            success: false,
            error: kind.label(),
            error_kind: kind,
            message,
            details,
            retry_after,
        }
    }
}
