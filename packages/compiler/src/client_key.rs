use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;

use crate::state::AppState;

const UNKNOWN_CLIENT: &str = "unknown";

/// Identity used for admission control: the peer address, or the first
/// `X-Forwarded-For` hop when the service sits behind a trusted proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKey(pub String);

impl ClientKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromRequestParts<AppState> for ClientKey {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if state.config.trust_proxy {
            if let Some(forwarded) = forwarded_for(parts) {
                return Ok(Self(forwarded));
            }
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());

        Ok(Self(peer))
    }
}

fn forwarded_for(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::upstream::MockLlmClient;
    use std::sync::Arc;

    fn state(trust_proxy: bool) -> AppState {
        let config = AppConfig {
            trust_proxy,
            ..AppConfig::default()
        };
        AppState::new(config, Arc::new(MockLlmClient::new(vec![])))
    }

    fn parts(forwarded: Option<&str>, peer: Option<SocketAddr>) -> Parts {
        let mut builder = axum::http::Request::builder().uri("/api/compile");
        if let Some(f) = forwarded {
            builder = builder.header("x-forwarded-for", f);
        }
        let (mut parts, _) = builder.body(()).expect("request").into_parts();
        if let Some(addr) = peer {
            parts.extensions.insert(ConnectInfo(addr));
        }
        parts
    }

    async fn key(state: &AppState, mut parts: Parts) -> String {
        match ClientKey::from_request_parts(&mut parts, state).await {
            Ok(k) => k.0,
            Err(never) => match never {},
        }
    }

    #[tokio::test]
    async fn uses_peer_ip() {
        let addr: SocketAddr = "203.0.113.9:51234".parse().expect("addr");
        let key = key(&state(false), parts(Some("10.0.0.1"), Some(addr))).await;
        assert_eq!(key, "203.0.113.9");
    }

    #[tokio::test]
    async fn trusted_proxy_uses_first_forwarded_hop() {
        let addr: SocketAddr = "127.0.0.1:80".parse().expect("addr");
        let key = key(
            &state(true),
            parts(Some(" 198.51.100.7 , 10.0.0.1"), Some(addr)),
        )
        .await;
        assert_eq!(key, "198.51.100.7");
    }

    #[tokio::test]
    async fn falls_back_to_unknown() {
        let key = key(&state(false), parts(None, None)).await;
        assert_eq!(key, UNKNOWN_CLIENT);
    }
}
