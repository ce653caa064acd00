//! Model Context Protocol (MCP) message model and protocol server
//!
//! Provides JSON-RPC parsing, classification and formatting, the handler registry, and the
//! per-call protocol-server instance.

pub mod message;
pub mod registry;
pub mod rpc;
pub mod server;
