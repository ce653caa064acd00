//! Read-only resources exposed via Model Context Protocol

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rust_mcp_sdk::schema::{
    ReadResourceContent, ReadResourceResult, Resource, TextResourceContents,
};
use serde_json::json;

use crate::{
    errors::AppError,
    mcp::{registry::ResourceHandler, server::SUPPORTED_PROTOCOL_VERSIONS},
    transport::context::RequestContext,
};

pub const SERVER_INFO_RESOURCE_URI: &str = "resource://server/info";

pub struct ServerInfo;

#[async_trait]
impl ResourceHandler for ServerInfo {
    fn definition(&self) -> Resource {
        Resource {
            annotations: None,
            description: Some("Server name, version and supported protocol versions".to_string()),
            icons: vec![],
            meta: None,
            mime_type: Some("application/json".to_string()),
            name: "Server Info".to_string(),
            size: None,
            title: None,
            uri: SERVER_INFO_RESOURCE_URI.to_string(),
        }
    }

    async fn read(&self, uri: &str, ctx: &RequestContext) -> Result<ReadResourceResult, AppError> {
        let structured_content = json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "mode": "stateless",
            "protocol_versions": SUPPORTED_PROTOCOL_VERSIONS,
            "call_id": ctx.call_id(),
            "generated_at_utc": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        });

        Ok(ReadResourceResult {
            contents: vec![ReadResourceContent::from(TextResourceContents {
                meta: None,
                mime_type: Some("application/json".to_string()),
                text: structured_content.to_string(),
                uri: uri.to_string(),
            })],
            meta: None,
        })
    }
}
