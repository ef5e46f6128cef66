use std::sync::Arc;
use std::time::Instant;

use crate::admission::AdmissionControl;
use crate::config::AppConfig;
use crate::normalize::Normalizer;
use crate::pipeline::CompilePipeline;
use crate::upstream::{LlmClient, UpstreamGateway};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<CompilePipeline>,
    pub config: Arc<AppConfig>,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the pipeline from configuration and an LLM client.
    pub fn new(config: AppConfig, client: Arc<dyn LlmClient>) -> Self {
        let admission =
            AdmissionControl::in_memory(config.rate_limit.max_requests, config.rate_limit.window);
        let gateway = UpstreamGateway::new(client, config.upstream.clone());
        let pipeline = CompilePipeline::new(
            admission,
            gateway,
            Normalizer::new(config.fallback_policy),
            config.diagnostics_enabled(),
        );

        Self {
            pipeline: Arc::new(pipeline),
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }
}
