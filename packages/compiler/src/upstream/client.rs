use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::UpstreamError;
use crate::upstream::config::UpstreamConfig;
use crate::upstream::types::{LlmRequest, LlmResponse, Message, Role, TokenUsage};

/// Trait for LLM clients, enabling mocking in tests.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, UpstreamError>;
}

/// OpenAI chat completions client.
///
/// Do not derive `Debug` here: it would print `api_key`.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    api_base_url: String,
    model: String,
    timeout: std::time::Duration,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f64,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    model: String,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiErrorResponse {
    error: Option<OpenAiErrorDetail>,
}

#[derive(Deserialize)]
struct OpenAiErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<String>,
}

impl OpenAiClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(UpstreamError::Transport)?;

        Ok(Self {
            http,
            api_key: config.api_key.clone().unwrap_or_default(),
            api_base_url: config.api_base_url.clone(),
            model: config.model.clone(),
            timeout: config.timeout,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, UpstreamError> {
        let url = format!("{}/v1/chat/completions", self.api_base_url);

        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(Message {
            role: Role::System,
            content: request.system.clone(),
        });
        messages.extend(request.messages.iter().cloned());

        let body = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout(self.timeout)
                } else {
                    UpstreamError::Transport(e)
                }
            })?;

        let status = resp.status().as_u16();

        if status != 200 {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body_text = resp.text().await.unwrap_or_default();
            let error = translate_error(status, &body_text, retry_after);
            warn!(status, error = %error, "upstream returned an error");
            return Err(error);
        }

        let api_response: ChatCompletionResponse = resp
            .json()
            .await
            .map_err(|e| UpstreamError::MalformedResponse(e.to_string()))?;

        let content = api_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or(UpstreamError::EmptyResponse)?;

        Ok(LlmResponse {
            content,
            model: api_response.model,
            usage: api_response.usage,
        })
    }
}

/// Map a non-success provider reply onto [`UpstreamError`].
///
/// The provider's `code` wins over its `type`, which wins over the HTTP
/// status. A 429 can mean either an exhausted quota or a transient rate
/// limit; only the code tells them apart.
pub fn translate_error(status: u16, body: &str, retry_after_secs: Option<u64>) -> UpstreamError {
    let detail = serde_json::from_str::<OpenAiErrorResponse>(body)
        .ok()
        .and_then(|r| r.error);

    let (message, identifiers) = match detail {
        Some(d) => (d.message, [d.code, d.kind]),
        None => (body.to_string(), [None, None]),
    };

    for id in identifiers.iter().flatten() {
        match id.as_str() {
            "insufficient_quota" => return UpstreamError::QuotaExceeded(message),
            "invalid_api_key" | "invalid_authentication" => {
                return UpstreamError::InvalidCredential(message)
            }
            "rate_limit_exceeded" | "rate_limit_error" => {
                return UpstreamError::RateLimited { retry_after_secs }
            }
            "context_length_exceeded" => return UpstreamError::ContextLengthExceeded(message),
            _ => {}
        }
    }

    match status {
        401 => UpstreamError::InvalidCredential(message),
        429 => UpstreamError::RateLimited { retry_after_secs },
        _ => UpstreamError::Provider { status, message },
    }
}

/// Test utilities for the LLM client.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Mock LLM client for testing. Returns pre-configured responses in order
    /// and records every request it receives.
    pub struct MockLlmClient {
        responses: Mutex<Vec<Result<LlmResponse, UpstreamError>>>,
        requests: Mutex<Vec<LlmRequest>>,
    }

    impl MockLlmClient {
        pub fn new(responses: Vec<Result<LlmResponse, UpstreamError>>) -> Self {
            // Reverse so we can pop from the end
            let mut responses = responses;
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn with_response(content: &str) -> Self {
            Self::new(vec![Ok(Self::reply(content))])
        }

        pub fn reply(content: &str) -> LlmResponse {
            LlmResponse {
                content: content.to_string(),
                model: "gpt-4o-2024-08-06".to_string(),
                usage: TokenUsage {
                    prompt_tokens: 100,
                    completion_tokens: 200,
                    total_tokens: 300,
                },
            }
        }

        pub fn requests(&self) -> Vec<LlmRequest> {
            self.requests
                .lock()
                .map(|r| r.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, UpstreamError> {
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(request.clone());
            }
            let mut responses = self.responses.lock().map_err(|e| {
                UpstreamError::MalformedResponse(format!("mock lock poisoned: {e}"))
            })?;
            responses.pop().unwrap_or(Err(UpstreamError::EmptyResponse))
        }
    }
}
