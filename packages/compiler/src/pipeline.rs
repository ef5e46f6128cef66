use chrono::Utc;
use tracing::{error, info, warn};

use crate::admission::{Admission, AdmissionControl};
use crate::error::{CompileError, ErrorKind, Result, ValidationError};
use crate::models::{ResponseEnvelope, ResponseMeta, SuccessEnvelope};
use crate::normalize::Normalizer;
use crate::upstream::UpstreamGateway;
use crate::validation;

/// Runs one compile request through admission, validation, the upstream
/// call and normalization.
pub struct CompilePipeline {
    admission: AdmissionControl,
    gateway: UpstreamGateway,
    normalizer: Normalizer,
    diagnostics: bool,
}

impl CompilePipeline {
    pub fn new(
        admission: AdmissionControl,
        gateway: UpstreamGateway,
        normalizer: Normalizer,
        diagnostics: bool,
    ) -> Self {
        Self {
            admission,
            gateway,
            normalizer,
            diagnostics,
        }
    }

    pub fn admission(&self) -> &AdmissionControl {
        &self.admission
    }

    pub fn diagnostics(&self) -> bool {
        self.diagnostics
    }

    /// Admission is counted before anything else, so a request that later
    /// fails validation still uses up its slot.
    pub async fn run(&self, client_key: &str, body: &[u8]) -> Result<SuccessEnvelope> {
        self.run_with(client_key, Ok(body)).await
    }

    /// `body` is `Err` when the transport could not read it, for example
    /// because it exceeded the size limit. The request is still admitted
    /// first and then fails validation with that reason.
    async fn run_with(
        &self,
        client_key: &str,
        body: std::result::Result<&[u8], ValidationError>,
    ) -> Result<SuccessEnvelope> {
        if let Admission::Denied { retry_after_secs } = self.admission.admit(client_key) {
            return Err(CompileError::RateLimited { retry_after_secs });
        }

        let request = validation::validate_body(body?)?;

        self.gateway.ensure_configured()?;

        info!(
            prompt_chars = request.prompt.chars().count(),
            "processing code generation request"
        );

        let completion = self.gateway.complete(&request).await?;
        let data = self.normalizer.normalize(&completion.content)?;

        Ok(SuccessEnvelope::new(
            data,
            ResponseMeta {
                model: completion.model,
                usage: completion.usage,
                response_time_ms: completion.latency_ms,
                timestamp: Utc::now(),
            },
        ))
    }

    /// Like [`run`](Self::run), but always yields an envelope.
    pub async fn handle(&self, client_key: &str, body: &[u8]) -> ResponseEnvelope {
        self.respond(self.run(client_key, body).await)
    }

    /// Envelope for a request whose body could not be read.
    pub async fn handle_unreadable(
        &self,
        client_key: &str,
        reason: ValidationError,
    ) -> ResponseEnvelope {
        self.respond(self.run_with(client_key, Err(reason)).await)
    }

    fn respond(&self, result: Result<SuccessEnvelope>) -> ResponseEnvelope {
        match result {
            Ok(success) => ResponseEnvelope::Success(success),
            Err(e) => {
                let envelope = e.to_envelope(self.diagnostics);
                match envelope.error_kind {
                    ErrorKind::InternalError | ErrorKind::ConfigurationError => {
                        error!(kind = envelope.error_kind.as_ref(), error = %e, "compile request failed")
                    }
                    ErrorKind::ValidationError | ErrorKind::RateLimitExceeded => {
                        info!(kind = envelope.error_kind.as_ref(), error = %e, "compile request rejected")
                    }
                    _ => warn!(kind = envelope.error_kind.as_ref(), error = %e, "compile request failed upstream"),
                }
                ResponseEnvelope::Failure(envelope)
            }
        }
    }
}
