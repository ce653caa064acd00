//! The Model Context Protocol engine
//!
//! An `McpServer` answers MCP methods from a shared, read-only `Registry`. The stateless HTTP
//! transport creates one per inbound call and closes it when the call ends; the pipe binding
//! keeps a single instance for the lifetime of the process.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use rust_mcp_sdk::schema::{
    CallToolRequestParams, Implementation, InitializeResult, ListResourcesResult,
    ListToolsResult, ReadResourceRequestParams, ServerCapabilities, ServerCapabilitiesPrompts,
    ServerCapabilitiesResources, ServerCapabilitiesTools,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::errors::AppError;
use crate::mcp::message::{ErrorCode, Message, MessageKind, RequestId};
use crate::mcp::registry::Registry;
use crate::mcp::rpc::{app_error_to_json_rpc, json_rpc_error, json_rpc_result};
use crate::transport::context::RequestContext;

pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 3] = ["2025-06-18", "2025-03-26", "2024-11-05"];
pub const LATEST_PROTOCOL_VERSION: &str = SUPPORTED_PROTOCOL_VERSIONS[0];

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Produces protocol-server instances bound to the discovered tools, prompts and resources.
#[async_trait]
pub trait ServerFactory: Send + Sync {
    async fn create_server(&self) -> Result<Arc<McpServer>, AppError>;
}

#[derive(Clone)]
pub struct RegistryServerFactory {
    registry: Arc<Registry>,
}

impl RegistryServerFactory {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ServerFactory for RegistryServerFactory {
    async fn create_server(&self) -> Result<Arc<McpServer>, AppError> {
        Ok(Arc::new(McpServer::new(Arc::clone(&self.registry))))
    }
}

#[derive(Debug, Deserialize)]
struct GetPromptParams {
    name: String,
    #[serde(default)]
    arguments: Map<String, Value>,
}

pub struct McpServer {
    instance: u64,
    registry: Arc<Registry>,
    closed: AtomicBool,
}

impl McpServer {
    pub fn new(registry: Arc<Registry>) -> Self {
        let instance = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
        debug!(instance, "mcp server created");
        Self {
            instance,
            registry,
            closed: AtomicBool::new(false),
        }
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(instance = self.instance, "mcp server closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Handles one unit. Returns the reply owed to it, if any.
    pub async fn handle_message(&self, message: Message, ctx: &RequestContext) -> Option<Message> {
        match message.kind() {
            MessageKind::Request => {
                let id = message.id;
                if self.is_closed() {
                    warn!(instance = self.instance, call_id = %ctx.call_id(), "request for closed server");
                    return Some(json_rpc_error(
                        id,
                        ErrorCode::ServerError,
                        "Service unavailable: shutting down",
                    ));
                }
                let method = message.method.unwrap_or_default();
                Some(self.handle_request(id, &method, message.params, ctx).await)
            }
            MessageKind::Notification => {
                let method = message.method.unwrap_or_default();
                debug!(call_id = %ctx.call_id(), method = %method, "notification received");
                None
            }
            MessageKind::Response => {
                warn!(call_id = %ctx.call_id(), "ignoring response sent by client");
                None
            }
            MessageKind::Invalid => Some(json_rpc_error(
                message.id,
                ErrorCode::InvalidRequest,
                "Invalid Request",
            )),
        }
    }

    pub async fn handle_request(
        &self,
        id: Option<RequestId>,
        method: &str,
        params: Option<Value>,
        ctx: &RequestContext,
    ) -> Message {
        let audit_params = redact_audit_params(params.as_ref());

        let mut scoped = None;
        let response = match method {
            "initialize" => match negotiate_protocol_version(params.as_ref()) {
                Ok(version) => json_rpc_result(id, &self.initialize_result(version)),
                Err(err) => app_error_to_json_rpc(id, err),
            },
            "ping" => json_rpc_result(id, &json!({})),
            "tools/list" => json_rpc_result(
                id,
                &ListToolsResult {
                    meta: None,
                    next_cursor: None,
                    tools: self.registry.tool_definitions(),
                },
            ),
            "tools/call" => {
                let call = params.and_then(|raw| serde_json::from_value::<CallToolRequestParams>(raw).ok());
                match call {
                    Some(call) => {
                        let tool_ctx = ctx.for_tool(&call.name);
                        let response = self.call_tool(id, call, &tool_ctx).await;
                        scoped = Some(tool_ctx);
                        response
                    }
                    None => json_rpc_error(id, ErrorCode::InvalidParams, "Invalid params"),
                }
            }
            "resources/list" => json_rpc_result(
                id,
                &ListResourcesResult {
                    meta: None,
                    next_cursor: None,
                    resources: self.registry.resource_definitions(),
                },
            ),
            "resources/read" => {
                let read = params.and_then(|raw| serde_json::from_value::<ReadResourceRequestParams>(raw).ok());
                match read {
                    Some(read) => self.read_resource(id, &read.uri, ctx).await,
                    None => json_rpc_error(id, ErrorCode::InvalidParams, "Invalid params"),
                }
            }
            "prompts/list" => json_rpc_result(
                id,
                &json!({ "prompts": self.registry.prompt_definitions() }),
            ),
            "prompts/get" => {
                let get = params.and_then(|raw| serde_json::from_value::<GetPromptParams>(raw).ok());
                match get {
                    Some(get) => self.get_prompt(id, get, ctx).await,
                    None => json_rpc_error(id, ErrorCode::InvalidParams, "Invalid params"),
                }
            }
            _ => json_rpc_error(id, ErrorCode::MethodNotFound, "Method not found"),
        };

        let audit_ctx = scoped.as_ref().unwrap_or(ctx);
        info!(
            call_id = %audit_ctx.call_id(),
            instance = self.instance,
            method = %method,
            tool = audit_ctx.tool_name().unwrap_or("-"),
            client = audit_ctx.auth().map(|auth| auth.client_id.as_str()).unwrap_or("-"),
            params = %audit_params,
            outcome = if response.is_error() { "failure" } else { "success" },
            "mcp action audited"
        );

        response
    }

    fn initialize_result(&self, protocol_version: &'static str) -> InitializeResult {
        let identity = self.registry.identity();
        InitializeResult {
            server_info: Implementation {
                name: identity.name.clone(),
                version: identity.version.clone(),
                title: None,
                description: None,
                icons: vec![],
                website_url: None,
            },
            capabilities: ServerCapabilities {
                tools: self.registry.has_tools().then_some(ServerCapabilitiesTools {
                    list_changed: Some(false),
                }),
                resources: self.registry.has_resources().then_some(ServerCapabilitiesResources {
                    subscribe: Some(false),
                    list_changed: Some(false),
                }),
                prompts: self.registry.has_prompts().then_some(ServerCapabilitiesPrompts {
                    list_changed: Some(false),
                }),
                ..Default::default()
            },
            protocol_version: protocol_version.to_string(),
            instructions: identity.instructions.clone(),
            meta: None,
        }
    }

    async fn call_tool(
        &self,
        id: Option<RequestId>,
        call: CallToolRequestParams,
        ctx: &RequestContext,
    ) -> Message {
        let Some(tool) = self.registry.tool(&call.name) else {
            return app_error_to_json_rpc(
                id,
                AppError::not_found("tool_not_found", format!("unknown tool: {}", call.name)),
            );
        };

        match tool.call(call.arguments.unwrap_or_default(), ctx).await {
            Ok(result) => json_rpc_result(id, &result),
            Err(err) => app_error_to_json_rpc(id, err),
        }
    }

    async fn read_resource(&self, id: Option<RequestId>, uri: &str, ctx: &RequestContext) -> Message {
        let Some(resource) = self.registry.resource(uri) else {
            return app_error_to_json_rpc(
                id,
                AppError::not_found("resource_not_found", format!("unknown resource uri: {uri}")),
            );
        };

        match resource.read(uri, ctx).await {
            Ok(result) => json_rpc_result(id, &result),
            Err(err) => app_error_to_json_rpc(id, err),
        }
    }

    async fn get_prompt(&self, id: Option<RequestId>, get: GetPromptParams, ctx: &RequestContext) -> Message {
        let Some(prompt) = self.registry.prompt(&get.name) else {
            return app_error_to_json_rpc(
                id,
                AppError::not_found("prompt_not_found", format!("unknown prompt: {}", get.name)),
            );
        };

        let missing = prompt
            .definition()
            .arguments
            .into_iter()
            .filter(|argument| argument.required && !get.arguments.contains_key(&argument.name))
            .map(|argument| argument.name)
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return app_error_to_json_rpc(
                id,
                AppError::bad_request(
                    "missing_prompt_arguments",
                    format!("missing required arguments: {}", missing.join(", ")),
                ),
            );
        }

        match prompt.get(get.arguments, ctx).await {
            Ok(result) => json_rpc_result(id, &result),
            Err(err) => app_error_to_json_rpc(id, err),
        }
    }
}

impl Drop for McpServer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Picks the protocol version for an `initialize` exchange. A supported offer is echoed back;
/// anything else is answered with the latest version this server speaks.
pub fn negotiate_protocol_version(params: Option<&Value>) -> Result<&'static str, AppError> {
    let offered_version = params
        .and_then(Value::as_object)
        .and_then(|object| object.get("protocolVersion"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|version| !version.is_empty())
        .ok_or_else(|| {
            AppError::bad_request(
                "invalid_protocol_version",
                "initialize params.protocolVersion is required",
            )
        })?;

    Ok(SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .copied()
        .find(|version| *version == offered_version)
        .unwrap_or(LATEST_PROTOCOL_VERSION))
}

pub fn redact_audit_params(params: Option<&Value>) -> Value {
    params.map(redact_audit_value).unwrap_or(Value::Null)
}

pub fn redact_audit_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), redact_audit_value(item))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_audit_value).collect()),
        _ => value.clone(),
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    matches!(
        normalized.as_str(),
        "authorization" | "bearer" | "credentials" | "credential" | "api_key" | "apikey"
    ) || normalized.contains("token")
        || normalized.contains("secret")
        || normalized.contains("password")
        || normalized.contains("credential")
}
