pub mod admission;
pub mod client_key;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod state;
pub mod upstream;
pub mod validation;

use axum::extract::DefaultBodyLimit;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub use admission::{Admission, AdmissionControl, AdmissionStore, InMemoryAdmissionStore};
pub use config::AppConfig;
pub use error::{CompileError, ErrorKind, UpstreamError, ValidationError};
pub use models::{GenerationRequest, GenerationResult, ResponseEnvelope};
pub use normalize::{normalize, FallbackPolicy};
pub use pipeline::CompilePipeline;
pub use state::AppState;

/// Build the HTTP router.
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(state.config.frontend_url.as_deref());

    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/compile",
            post(handlers::compile).fallback(handlers::not_found),
        )
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(config::BODY_LIMIT_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(frontend_url: Option<&str>) -> CorsLayer {
    let origin = match frontend_url.map(HeaderValue::from_str) {
        Some(Ok(value)) => AllowOrigin::exact(value),
        Some(Err(e)) => {
            tracing::warn!(error = %e, "FRONTEND_URL is not a valid origin, allowing any origin");
            AllowOrigin::any()
        }
        None => AllowOrigin::any(),
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
}
