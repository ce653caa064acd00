//! Interactive tools exposed via Model Context Protocol
//!
//! Provides `greet` and `whoami`. Both read only their arguments and the per-call context.

use async_trait::async_trait;
use rust_mcp_sdk::{
    macros,
    schema::{CallToolResult, ContentBlock, TextContent, Tool},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{errors::AppError, mcp::registry::ToolHandler, transport::context::RequestContext};

const MAX_NAME_CHARS: usize = 256;

#[macros::mcp_tool(name = "greet", description = "Greet someone by name")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct GreetTool {
    pub name: String,
}

#[macros::mcp_tool(
    name = "whoami",
    description = "Report the identity the current call was authenticated as"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct WhoAmITool {}

pub struct Greet;

#[async_trait]
impl ToolHandler for Greet {
    fn definition(&self) -> Tool {
        GreetTool::tool()
    }

    async fn call(
        &self,
        arguments: Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<CallToolResult, AppError> {
        let params: GreetTool = serde_json::from_value(Value::Object(arguments))
            .map_err(|_| AppError::bad_request("invalid_arguments", "name must be a string"))?;

        let name = params.name.trim();
        if name.is_empty() {
            return Err(AppError::bad_request(
                "invalid_arguments",
                "name must not be empty",
            ));
        }
        if name.chars().count() > MAX_NAME_CHARS {
            return Err(AppError::bad_request(
                "invalid_arguments",
                format!("name must be at most {MAX_NAME_CHARS} characters"),
            ));
        }

        Ok(text_result(format!("Hello, {name}!"), None))
    }
}

pub struct WhoAmI;

#[async_trait]
impl ToolHandler for WhoAmI {
    fn definition(&self) -> Tool {
        WhoAmITool::tool()
    }

    async fn call(
        &self,
        _arguments: Map<String, Value>,
        ctx: &RequestContext,
    ) -> Result<CallToolResult, AppError> {
        let result = match ctx.auth() {
            Some(auth) => text_result(
                format!("Authenticated as {}", auth.client_id),
                Some(Map::from_iter([
                    ("authenticated".to_string(), json!(true)),
                    ("client_id".to_string(), json!(auth.client_id)),
                    ("scopes".to_string(), json!(auth.scopes)),
                    ("expires_at".to_string(), json!(auth.expires_at)),
                ])),
            ),
            None => text_result(
                "Anonymous caller",
                Some(Map::from_iter([("authenticated".to_string(), json!(false))])),
            ),
        };
        Ok(result)
    }
}

fn text_result(text: impl Into<String>, structured_content: Option<Map<String, Value>>) -> CallToolResult {
    CallToolResult {
        content: vec![ContentBlock::from(TextContent::new(text.into(), None, None))],
        is_error: None,
        meta: None,
        structured_content,
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderMap;

    use super::*;
    use crate::auth::AuthInfo;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn text(result: &CallToolResult) -> Value {
        serde_json::to_value(result).expect("tool result serialization")["content"][0]["text"].clone()
    }

    #[tokio::test]
    async fn greet_says_hello() {
        let ctx = RequestContext::new(HeaderMap::new());

        let result = Greet.call(args(json!({"name": "Ada"})), &ctx).await.unwrap();

        assert_eq!(text(&result), "Hello, Ada!");
    }

    #[tokio::test]
    async fn greet_rejects_missing_or_blank_names() {
        let ctx = RequestContext::new(HeaderMap::new());

        let missing = Greet.call(Map::new(), &ctx).await.expect_err("missing name");
        let blank = Greet.call(args(json!({"name": "  "})), &ctx).await.expect_err("blank name");

        assert!(matches!(missing, AppError::BadRequest { code: "invalid_arguments", .. }));
        assert!(matches!(blank, AppError::BadRequest { code: "invalid_arguments", .. }));
    }

    #[test]
    fn definitions_carry_tool_names() {
        assert_eq!(Greet.definition().name, "greet");
        assert_eq!(WhoAmI.definition().name, "whoami");
    }

    #[tokio::test]
    async fn whoami_reports_resolved_identity() {
        let ctx = RequestContext::new(HeaderMap::new()).with_auth(Some(AuthInfo {
            token: "secret".to_string(),
            client_id: "client-abc".to_string(),
            scopes: vec!["tools:call".to_string()],
            expires_at: None,
            extra: None,
        }));

        let result = WhoAmI.call(Map::new(), &ctx).await.unwrap();
        let structured = result.structured_content.expect("structured content");

        assert_eq!(structured["client_id"], "client-abc");
        assert_eq!(structured["scopes"], json!(["tools:call"]));
    }

    #[tokio::test]
    async fn whoami_without_identity_is_anonymous() {
        let ctx = RequestContext::new(HeaderMap::new());

        let result = WhoAmI.call(Map::new(), &ctx).await.unwrap();

        assert_eq!(text(&result), "Anonymous caller");
    }
}
