//! Built-in tools, resources and prompts
//!
//! Provides the registry served by the binary. Embedders assemble their own `Registry` and
//! hand it to `RegistryServerFactory` instead.

pub mod prompts;
pub mod resources;
pub mod tools;

use crate::mcp::registry::{Registry, ServerIdentity};

pub fn default_registry() -> Registry {
    Registry::new(ServerIdentity::default())
        .with_tool(tools::Greet)
        .with_tool(tools::WhoAmI)
        .with_resource(resources::ServerInfo)
        .with_prompt(prompts::ReviewCode)
}
