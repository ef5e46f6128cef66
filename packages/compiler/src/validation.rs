use serde_json::Value;

use crate::error::ValidationError;
use crate::models::{GenerationOptions, GenerationRequest};

pub const MAX_PROMPT_CHARS: usize = 50_000;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 4000;

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Parse a raw request body and validate it.
pub fn validate_body(body: &[u8]) -> Result<GenerationRequest, ValidationError> {
    let value: Value = serde_json::from_slice(body).map_err(|_| ValidationError::MalformedBody)?;
    validate(&value)
}

/// Validate an inbound payload, stopping at the first failed check.
pub fn validate(body: &Value) -> Result<GenerationRequest, ValidationError> {
    let prompt = match body.get("prompt") {
        None | Some(Value::Null) => return Err(ValidationError::MissingPrompt),
        Some(Value::String(prompt)) => prompt,
        Some(_) => return Err(ValidationError::PromptNotString),
    };

    if prompt.trim().is_empty() {
        return Err(ValidationError::EmptyPrompt);
    }

    if prompt.chars().count() > MAX_PROMPT_CHARS {
        return Err(ValidationError::PromptTooLong);
    }

    Ok(GenerationRequest {
        prompt: prompt.clone(),
        options: parse_options(body.get("options")),
    })
}

// Malformed option values fall back to defaults rather than failing.
fn parse_options(options: Option<&Value>) -> GenerationOptions {
    let defaults = GenerationOptions::default();
    let Some(options) = options.and_then(Value::as_object) else {
        return defaults;
    };

    let temperature = options
        .get("temperature")
        .and_then(Value::as_f64)
        .filter(|t| t.is_finite())
        .unwrap_or(defaults.temperature);

    let max_tokens = options
        .get("maxTokens")
        .and_then(Value::as_u64)
        .filter(|&n| n > 0)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(defaults.max_tokens);

    GenerationOptions {
        temperature,
        max_tokens,
    }
}
