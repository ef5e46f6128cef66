use std::env;
use std::time::Duration;

use crate::admission::{DEFAULT_CAPACITY, DEFAULT_WINDOW, MAX_WINDOW};
use crate::normalize::FallbackPolicy;
use crate::upstream::UpstreamConfig;

pub const BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
    /// `None` disables periodic eviction of expired windows.
    pub evict_interval: Option<Duration>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_CAPACITY,
            window: DEFAULT_WINDOW,
            evict_interval: Some(DEFAULT_WINDOW),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub environment: String,
    /// Allowed CORS origin; `None` allows any origin.
    pub frontend_url: Option<String>,
    /// Take the client key from `X-Forwarded-For` instead of the peer address.
    pub trust_proxy: bool,
    pub rate_limit: RateLimitConfig,
    pub fallback_policy: FallbackPolicy,
    pub upstream: UpstreamConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            environment: "development".to_string(),
            frontend_url: None,
            trust_proxy: false,
            rate_limit: RateLimitConfig::default(),
            fallback_policy: FallbackPolicy::default(),
            upstream: UpstreamConfig::builder("").build(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let port = env_parse("PORT", 8000);

        let environment = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let frontend_url = env::var("FRONTEND_URL")
            .ok()
            .filter(|v| !v.is_empty() && v != "*");

        let trust_proxy = env::var("TRUST_PROXY")
            .ok()
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let evict_secs: u64 = env_parse("RATE_LIMIT_EVICT_INTERVAL_SECS", DEFAULT_WINDOW.as_secs());
        let rate_limit = RateLimitConfig {
            max_requests: env_parse("RATE_LIMIT_MAX_REQUESTS", DEFAULT_CAPACITY),
            window: clamp_window(env_parse("RATE_LIMIT_WINDOW_SECS", DEFAULT_WINDOW.as_secs())),
            evict_interval: (evict_secs > 0).then(|| Duration::from_secs(evict_secs)),
        };

        let fallback_policy = match env::var("FALLBACK_POLICY") {
            Ok(v) => v.parse().unwrap_or_else(|_| {
                tracing::warn!(
                    "FALLBACK_POLICY={v} is not one of lenient, strict. Falling back to lenient."
                );
                FallbackPolicy::Lenient
            }),
            Err(_) => FallbackPolicy::Lenient,
        };

        let upstream = UpstreamConfig::from_env();

        if upstream.is_configured() {
            tracing::info!(model = %upstream.model, "upstream API key configured");
        } else {
            tracing::warn!("OPENAI_API_KEY is not set; compile requests will fail until it is");
        }

        Self {
            port,
            environment,
            frontend_url,
            trust_proxy,
            rate_limit,
            fallback_policy,
            upstream,
        }
    }

    /// Error details are only exposed while developing.
    pub fn diagnostics_enabled(&self) -> bool {
        self.environment == "development"
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
{
    parse_or_default(key, env::var(key).ok().as_deref(), default)
}

/// Parse `raw` as `T`. An unset value yields `default` silently; a value that
/// does not parse yields `default` with a warning.
fn parse_or_default<T>(key: &str, raw: Option<&str>, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
{
    let Some(raw) = raw else {
        return default;
    };
    raw.trim().parse::<T>().unwrap_or_else(|_| {
        tracing::warn!("{key}={raw} is not a valid value. Falling back to {default}.");
        default
    })
}

fn clamp_window(secs: u64) -> Duration {
    let window = Duration::from_secs(secs);
    if window > MAX_WINDOW {
        tracing::warn!(
            "RATE_LIMIT_WINDOW_SECS={secs} exceeds the maximum. Clamping to {}.",
            MAX_WINDOW.as_secs()
        );
        return MAX_WINDOW;
    }
    window
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_development() {
        let config = AppConfig::default();
        assert_eq!(config.port, 8000);
        assert!(config.diagnostics_enabled());
        assert!(!config.upstream.is_configured());
        assert_eq!(config.rate_limit.max_requests, 60);
        assert_eq!(config.rate_limit.window, Duration::from_secs(60));
    }

    #[test]
    fn unset_value_uses_default() {
        assert_eq!(parse_or_default::<u32>("RATE_LIMIT_MAX_REQUESTS", None, 60), 60);
    }

    #[test]
    fn valid_value_is_parsed() {
        assert_eq!(parse_or_default::<u16>("PORT", Some(" 9000 "), 8000), 9000);
    }

    #[test]
    fn unparsable_value_falls_back_to_default() {
        assert_eq!(parse_or_default::<u16>("PORT", Some("80a0"), 8000), 8000);
        assert_eq!(parse_or_default::<u16>("PORT", Some("70000"), 8000), 8000);
        assert_eq!(
            parse_or_default::<u32>("RATE_LIMIT_MAX_REQUESTS", Some("-5"), 60),
            60
        );
    }

    #[test]
    fn window_is_clamped_to_maximum() {
        assert_eq!(clamp_window(60), Duration::from_secs(60));
        assert_eq!(clamp_window(u64::MAX), MAX_WINDOW);
        assert_eq!(clamp_window(MAX_WINDOW.as_secs()), MAX_WINDOW);
    }

    #[test]
    fn production_hides_details() {
        let config = AppConfig {
            environment: "production".into(),
            ..AppConfig::default()
        };
        assert!(!config.diagnostics_enabled());
    }
}
