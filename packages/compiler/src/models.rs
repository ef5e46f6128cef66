use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::upstream::TokenUsage;

/// Sampling parameters forwarded to the upstream model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f64,
    pub max_tokens: u32,
}

/// A validated compile request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub options: GenerationOptions,
}

/// Structured code generation output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub code: String,
    pub language: String,
    pub explanation: String,
    pub dependencies: Vec<String>,
    pub instructions: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub model: String,
    pub usage: TokenUsage,
    pub response_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuccessEnvelope {
    pub success: bool,
    pub data: GenerationResult,
    pub meta: ResponseMeta,
}

impl SuccessEnvelope {
    pub fn new(data: GenerationResult, meta: ResponseMeta) -> Self {
        Self {
            success: true,
            data,
            meta,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEnvelope {
    #[serde(skip)]
    pub status: StatusCode,
    pub success: bool,
    pub error: &'static str,
    pub error_kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Exactly one of these is produced per compile request.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResponseEnvelope {
    Success(SuccessEnvelope),
    Failure(FailureEnvelope),
}

impl IntoResponse for ResponseEnvelope {
    fn into_response(self) -> Response {
        match self {
            ResponseEnvelope::Success(success) => (StatusCode::OK, Json(success)).into_response(),
            ResponseEnvelope::Failure(failure) => failure.into_response(),
        }
    }
}

impl IntoResponse for FailureEnvelope {
    fn into_response(self) -> Response {
        let status = self.status;
        let retry_after = self.retry_after;
        let mut response = (status, Json(self)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: f64,
    pub environment: String,
}
