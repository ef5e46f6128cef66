use serde_json::{Map, Value};
use strum::{Display, EnumString};
use tracing::warn;

use crate::error::{CompileError, Result};
use crate::models::GenerationResult;

pub const UNKNOWN_LANGUAGE: &str = "unknown";

const MISSING_CODE: &str = "// No code was generated";
const MISSING_EXPLANATION: &str = "No explanation provided";
const MISSING_INSTRUCTIONS: &str = "No setup instructions provided";

const FALLBACK_EXPLANATION: &str = "Generated code (JSON parsing failed)";
const FALLBACK_INSTRUCTIONS: &str =
    "Run the generated code according to the language requirements";

/// What to do when the provider's text is not a JSON object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum FallbackPolicy {
    /// Return the raw text as code.
    #[default]
    Lenient,
    /// Fail the request.
    Strict,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    policy: FallbackPolicy,
}

impl Normalizer {
    pub fn new(policy: FallbackPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> FallbackPolicy {
        self.policy
    }

    pub fn normalize(&self, raw: &str) -> Result<GenerationResult> {
        match parse_object(raw) {
            Ok(object) => Ok(from_object(&object)),
            Err(reason) => match self.policy {
                FallbackPolicy::Lenient => {
                    warn!(error = %reason, "upstream response is not a JSON object, using raw text");
                    Ok(fallback(raw))
                }
                FallbackPolicy::Strict => Err(CompileError::Normalize(reason)),
            },
        }
    }
}

/// Lenient normalization; never fails.
pub fn normalize(raw: &str) -> GenerationResult {
    match parse_object(raw) {
        Ok(object) => from_object(&object),
        Err(_) => fallback(raw),
    }
}

fn parse_object(raw: &str) -> std::result::Result<Map<String, Value>, String> {
    let text = strip_code_fence(raw);
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(other) => Err(format!("expected a JSON object, got {}", json_type(&other))),
        Err(e) => Err(e.to_string()),
    }
}

/// Strip a surrounding markdown fence (```json ... ```), if any.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    match body.split_once('\n') {
        Some((tag, inner)) if !tag.contains('{') => inner.trim(),
        _ => body.trim(),
    }
}

fn from_object(object: &Map<String, Value>) -> GenerationResult {
    GenerationResult {
        code: string_field(object, "code", MISSING_CODE),
        language: string_field(object, "language", UNKNOWN_LANGUAGE),
        explanation: string_field(object, "explanation", MISSING_EXPLANATION),
        dependencies: dependencies(object.get("dependencies")),
        instructions: string_field(object, "instructions", MISSING_INSTRUCTIONS),
    }
}

fn string_field(object: &Map<String, Value>, key: &str, default: &str) -> String {
    object
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn dependencies(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(single)) if !single.trim().is_empty() => vec![single.clone()],
        _ => Vec::new(),
    }
}

fn fallback(raw: &str) -> GenerationResult {
    GenerationResult {
        code: raw.to_string(),
        language: UNKNOWN_LANGUAGE.to_string(),
        explanation: FALLBACK_EXPLANATION.to_string(),
        dependencies: Vec::new(),
        instructions: FALLBACK_INSTRUCTIONS.to_string(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
