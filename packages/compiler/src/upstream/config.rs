use std::fmt;
use std::time::Duration;

use crate::config::env_parse;

/// Value shipped in sample `.env` files; treated the same as an unset key.
pub const PLACEHOLDER_API_KEY: &str = "your-openai-api-key-here";

const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_API_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Configuration for the upstream completion provider.
#[derive(Clone)]
pub struct UpstreamConfig {
    /// `None` when the key is unset, empty, or the placeholder.
    pub api_key: Option<String>,
    pub model: String,
    pub api_base_url: String,
    pub timeout: Duration,
    /// Extra attempts after a provider rate limit. Zero means one attempt.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("api_base_url", &self.api_base_url)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_base_delay", &self.retry_base_delay)
            .finish()
    }
}

impl UpstreamConfig {
    /// Load configuration from environment variables. A missing key is not
    /// an error here; it is reported per request.
    pub fn from_env() -> Self {
        let api_key = usable_api_key(std::env::var("OPENAI_API_KEY").ok());

        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into());

        let api_base_url = std::env::var("OPENAI_API_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_API_BASE_URL.into());

        let timeout_secs: u64 = env_parse("UPSTREAM_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS);
        let max_retries: u32 = env_parse("UPSTREAM_MAX_RETRIES", 0);

        Self {
            api_key,
            model,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(timeout_secs),
            max_retries,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
        }
    }

    /// Create a config builder for testing.
    pub fn builder(api_key: impl Into<String>) -> UpstreamConfigBuilder {
        UpstreamConfigBuilder {
            api_key: usable_api_key(Some(api_key.into())),
            model: DEFAULT_MODEL.into(),
            api_base_url: DEFAULT_API_BASE_URL.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: 0,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

fn usable_api_key(key: Option<String>) -> Option<String> {
    key.map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty() && k != PLACEHOLDER_API_KEY)
}

/// Builder for constructing `UpstreamConfig` in tests.
pub struct UpstreamConfigBuilder {
    api_key: Option<String>,
    model: String,
    api_base_url: String,
    timeout: Duration,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl UpstreamConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn api_base_url(mut self, api_base_url: impl Into<String>) -> Self {
        self.api_base_url = api_base_url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn build(self) -> UpstreamConfig {
        UpstreamConfig {
            api_key: self.api_key,
            model: self.model,
            api_base_url: self.api_base_url.trim_end_matches('/').to_string(),
            timeout: self.timeout,
            max_retries: self.max_retries,
            retry_base_delay: self.retry_base_delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_and_blank_keys_are_unconfigured() {
        assert!(!UpstreamConfig::builder(PLACEHOLDER_API_KEY).build().is_configured());
        assert!(!UpstreamConfig::builder("").build().is_configured());
        assert!(!UpstreamConfig::builder("   ").build().is_configured());
        assert!(UpstreamConfig::builder("sk-test").build().is_configured());
    }

    #[test]
    fn debug_redacts_key() {
        let config = UpstreamConfig::builder("sk-secret").build();
        let printed = format!("{config:?}");
        assert!(!printed.contains("sk-secret"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let config = UpstreamConfig::builder("k")
            .api_base_url("http://localhost:9000/")
            .build();
        assert_eq!(config.api_base_url, "http://localhost:9000");
    }
}
