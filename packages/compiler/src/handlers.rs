use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;

use crate::client_key::ClientKey;
use crate::error::{CompileError, ValidationError};
use crate::models::{HealthResponse, ResponseEnvelope};
use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
        uptime_seconds: state.started_at.elapsed().as_secs_f64(),
        environment: state.config.environment.clone(),
    })
}

// The body is taken as raw bytes so admission is counted before the JSON is
// parsed. A body that cannot be read still gets a JSON envelope.
pub async fn compile(
    State(state): State<AppState>,
    client: ClientKey,
    body: Result<Bytes, BytesRejection>,
) -> ResponseEnvelope {
    match body {
        Ok(body) => state.pipeline.handle(client.as_str(), &body).await,
        Err(rejection) => {
            let reason = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                ValidationError::BodyTooLarge
            } else {
                ValidationError::MalformedBody
            };
            state.pipeline.handle_unreadable(client.as_str(), reason).await
        }
    }
}

pub async fn not_found(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    CompileError::NotFound {
        method: method.to_string(),
        path: uri.path().to_string(),
    }
    .to_envelope(state.pipeline.diagnostics())
    .into_response()
}
