mod client;
mod config;
mod prompt;
mod types;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

pub use client::{translate_error, LlmClient, OpenAiClient};
#[cfg(any(test, feature = "test-utils"))]
pub use client::test_support::MockLlmClient;
pub use config::{UpstreamConfig, UpstreamConfigBuilder, PLACEHOLDER_API_KEY};
pub use prompt::{build_request, build_system_prompt};
pub use types::{LlmRequest, LlmResponse, Message, RawCompletion, Role, TokenUsage};

use crate::error::{CompileError, UpstreamError};
use crate::models::GenerationRequest;

/// Cap on how long a provider `retry-after` may hold a request.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Single point of contact with the completion provider.
///
/// Builds the provider request, enforces the per-call deadline, retries
/// provider rate limits when configured to, and measures latency.
#[derive(Clone)]
pub struct UpstreamGateway {
    client: Arc<dyn LlmClient>,
    config: Arc<UpstreamConfig>,
}

impl UpstreamGateway {
    pub fn new(client: Arc<dyn LlmClient>, config: UpstreamConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }

    /// Fails with `Configuration` when no usable credential is set, so the
    /// provider is never contacted without one.
    pub fn ensure_configured(&self) -> Result<(), CompileError> {
        if self.config.is_configured() {
            Ok(())
        } else {
            Err(CompileError::Configuration)
        }
    }

    pub async fn complete(
        &self,
        request: &GenerationRequest,
    ) -> Result<RawCompletion, UpstreamError> {
        let llm_request = build_request(request);
        let max_attempts = self.config.max_retries.saturating_add(1);

        let mut attempt: u32 = 0;

        // Latency covers the successful call only, not earlier attempts or backoff.
        let (response, started) = loop {
            attempt += 1;
            let started = Instant::now();
            match self.attempt(&llm_request).await {
                Ok(response) => break (response, started),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.retry_delay(attempt, &e);
                    warn!(attempt, error = %e, "retrying upstream request after {:?}", delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        };

        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(latency_ms, model = %response.model, "upstream response received");

        Ok(RawCompletion {
            content: response.content,
            model: response.model,
            usage: response.usage,
            latency_ms,
        })
    }

    async fn attempt(&self, request: &LlmRequest) -> Result<LlmResponse, UpstreamError> {
        match tokio::time::timeout(self.config.timeout, self.client.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout(self.config.timeout)),
        }
    }

    fn retry_delay(&self, attempt: u32, error: &UpstreamError) -> Duration {
        let backoff = self
            .config
            .retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let hinted = match error {
            UpstreamError::RateLimited {
                retry_after_secs: Some(secs),
            } => Duration::from_secs(*secs),
            _ => Duration::ZERO,
        };
        let delay = backoff.max(hinted).min(MAX_RETRY_DELAY);
        debug!(attempt, ?delay, "computed retry delay");
        delay
    }
}
