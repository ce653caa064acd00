//! Tool, prompt and resource registry
//!
//! The registry is assembled once at startup and is read-only afterwards, so any number of
//! concurrent calls may share it behind an `Arc`.

use std::sync::Arc;

use async_trait::async_trait;
use rust_mcp_sdk::schema::{CallToolResult, ReadResourceResult, Resource, Tool};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{errors::AppError, transport::context::RequestContext};

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn definition(&self) -> Tool;

    async fn call(
        &self,
        arguments: Map<String, Value>,
        ctx: &RequestContext,
    ) -> Result<CallToolResult, AppError>;
}

#[async_trait]
pub trait ResourceHandler: Send + Sync {
    fn definition(&self) -> Resource;

    async fn read(&self, uri: &str, ctx: &RequestContext) -> Result<ReadResourceResult, AppError>;
}

#[async_trait]
pub trait PromptHandler: Send + Sync {
    fn definition(&self) -> PromptDefinition;

    async fn get(
        &self,
        arguments: Map<String, Value>,
        ctx: &RequestContext,
    ) -> Result<PromptResult, AppError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub arguments: Vec<PromptArgument>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptMessage {
    pub role: &'static str,
    pub content: Value,
}

impl PromptMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: serde_json::json!({ "type": "text", "text": text.into() }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub messages: Vec<PromptMessage>,
}

#[derive(Debug, Clone)]
pub struct ServerIdentity {
    pub name: String,
    pub version: String,
    pub instructions: Option<String>,
}

impl Default for ServerIdentity {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            instructions: None,
        }
    }
}

#[derive(Clone, Default)]
pub struct Registry {
    identity: ServerIdentity,
    tools: Vec<(String, Arc<dyn ToolHandler>)>,
    resources: Vec<(String, Arc<dyn ResourceHandler>)>,
    prompts: Vec<(String, Arc<dyn PromptHandler>)>,
}

impl Registry {
    pub fn new(identity: ServerIdentity) -> Self {
        Self {
            identity,
            ..Self::default()
        }
    }

    pub fn with_tool(mut self, handler: impl ToolHandler + 'static) -> Self {
        let name = handler.definition().name;
        self.tools.push((name, Arc::new(handler)));
        self
    }

    pub fn with_resource(mut self, handler: impl ResourceHandler + 'static) -> Self {
        let uri = handler.definition().uri;
        self.resources.push((uri, Arc::new(handler)));
        self
    }

    pub fn with_prompt(mut self, handler: impl PromptHandler + 'static) -> Self {
        let name = handler.definition().name;
        self.prompts.push((name, Arc::new(handler)));
        self
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    pub fn tool(&self, name: &str) -> Option<&Arc<dyn ToolHandler>> {
        lookup(&self.tools, name)
    }

    pub fn resource(&self, uri: &str) -> Option<&Arc<dyn ResourceHandler>> {
        lookup(&self.resources, uri)
    }

    pub fn prompt(&self, name: &str) -> Option<&Arc<dyn PromptHandler>> {
        lookup(&self.prompts, name)
    }

    pub fn tool_definitions(&self) -> Vec<Tool> {
        self.tools.iter().map(|(_, tool)| tool.definition()).collect()
    }

    pub fn resource_definitions(&self) -> Vec<Resource> {
        self.resources
            .iter()
            .map(|(_, resource)| resource.definition())
            .collect()
    }

    pub fn prompt_definitions(&self) -> Vec<PromptDefinition> {
        self.prompts
            .iter()
            .map(|(_, prompt)| prompt.definition())
            .collect()
    }

    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }

    pub fn has_resources(&self) -> bool {
        !self.resources.is_empty()
    }

    pub fn has_prompts(&self) -> bool {
        !self.prompts.is_empty()
    }
}

fn lookup<'a, T: ?Sized>(entries: &'a [(String, Arc<T>)], key: &str) -> Option<&'a Arc<T>> {
    entries
        .iter()
        .find(|(name, _)| name == key)
        .map(|(_, handler)| handler)
}
