//! Prompt templates exposed via Model Context Protocol

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::{
    errors::AppError,
    mcp::registry::{PromptArgument, PromptDefinition, PromptHandler, PromptMessage, PromptResult},
    transport::context::RequestContext,
};

pub struct ReviewCode;

#[async_trait]
impl PromptHandler for ReviewCode {
    fn definition(&self) -> PromptDefinition {
        PromptDefinition {
            name: "review-code".to_string(),
            description: Some("Ask the model to review a code snippet".to_string()),
            arguments: vec![
                PromptArgument {
                    name: "code".to_string(),
                    description: Some("The code to review".to_string()),
                    required: true,
                },
                PromptArgument {
                    name: "language".to_string(),
                    description: Some("Language of the snippet".to_string()),
                    required: false,
                },
            ],
        }
    }

    async fn get(
        &self,
        arguments: Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<PromptResult, AppError> {
        let code = arguments
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::bad_request("invalid_arguments", "code must be a string"))?;
        let language = arguments
            .get("language")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|language| !language.is_empty());

        let text = match language {
            Some(language) => {
                format!("Please review this {language} code for bugs and style issues:\n\n```{language}\n{code}\n```")
            }
            None => format!("Please review this code for bugs and style issues:\n\n```\n{code}\n```"),
        };

        Ok(PromptResult {
            description: Some("Code review request".to_string()),
            messages: vec![PromptMessage::user_text(text)],
        })
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderMap;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn renders_language_fence() {
        let ctx = RequestContext::new(HeaderMap::new());
        let arguments = json!({"code": "fn main() {}", "language": "rust"});

        let result = ReviewCode
            .get(arguments.as_object().cloned().unwrap(), &ctx)
            .await
            .unwrap();

        let text = result.messages[0].content["text"].as_str().unwrap();
        assert!(text.contains("```rust\nfn main() {}\n```"));
    }

    #[tokio::test]
    async fn rejects_non_string_code() {
        let ctx = RequestContext::new(HeaderMap::new());
        let arguments = json!({"code": 42});

        let err = ReviewCode
            .get(arguments.as_object().cloned().unwrap(), &ctx)
            .await
            .expect_err("non-string code");

        assert!(matches!(err, AppError::BadRequest { .. }));
    }
}
