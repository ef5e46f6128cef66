use crate::models::GenerationRequest;
use crate::upstream::types::{LlmRequest, Message, Role};

const SYSTEM_CODEGEN: &str = include_str!("../../prompts/system_codegen.txt");

/// Build the system prompt for code generation.
pub fn build_system_prompt() -> &'static str {
    SYSTEM_CODEGEN
}

/// Build the provider request for a validated compile request. The user
/// turn is the prompt exactly as the caller sent it.
pub fn build_request(request: &GenerationRequest) -> LlmRequest {
    LlmRequest {
        system: build_system_prompt().to_string(),
        messages: vec![Message {
            role: Role::User,
            content: request.prompt.clone(),
        }],
        max_tokens: request.options.max_tokens,
        temperature: request.options.temperature,
        json_mode: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GenerationOptions;

    #[test]
    fn system_prompt_names_every_result_field() {
        let system = build_system_prompt();
        for field in ["code", "language", "explanation", "dependencies", "instructions"] {
            assert!(system.contains(&format!("\"{field}\"")), "missing {field}");
        }
        assert!(system.contains("JSON object"));
    }

    #[test]
    fn request_carries_prompt_and_options() {
        let request = build_request(&GenerationRequest {
            prompt: "build a todo app".into(),
            options: GenerationOptions {
                temperature: 0.3,
                max_tokens: 512,
            },
        });

        assert!(request.json_mode);
        assert_eq!(request.temperature, 0.3);
        assert_eq!(request.max_tokens, 512);
        assert_eq!(
            request.messages,
            vec![Message {
                role: Role::User,
                content: "build a todo app".into(),
            }]
        );
    }
}
