#![allow(dead_code, clippy::expect_used)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use prompt_compiler::upstream::{OpenAiClient, UpstreamConfig};
use prompt_compiler::{app, AppConfig, AppState};
use serde_json::Value;
use tower::ServiceExt;

pub fn chat_completion(content: &str) -> Value {
    serde_json::json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1_715_367_049,
        "model": "gpt-4o-2024-08-06",
        "choices": [
            {
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }
        ],
        "usage": {
            "prompt_tokens": 120,
            "completion_tokens": 340,
            "total_tokens": 460
        }
    })
}

pub fn provider_error(code: &str, kind: &str, message: &str) -> Value {
    serde_json::json!({
        "error": {
            "message": message,
            "type": kind,
            "param": null,
            "code": code
        }
    })
}

pub fn todo_app_result() -> String {
    serde_json::json!({
        "code": "const todos = [];\nfunction add(t) { todos.push(t); }",
        "language": "javascript",
        "explanation": "A minimal in-memory todo list.",
        "dependencies": [],
        "instructions": "Run with node todo.js"
    })
    .to_string()
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

/// Build the app against `base_url` with the given key and environment.
pub fn test_app(base_url: &str, api_key: &str, environment: &str) -> TestApp {
    let upstream = UpstreamConfig::builder(api_key)
        .api_base_url(base_url)
        .build();
    let config = AppConfig {
        environment: environment.to_string(),
        upstream,
        ..AppConfig::default()
    };

    let client = OpenAiClient::new(&config.upstream).expect("client");
    let state = AppState::new(config, Arc::new(client));

    TestApp {
        router: app(state.clone()),
        state,
    }
}

pub fn compile_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/compile")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}
