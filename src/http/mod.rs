//! Buffered HTTP binding for the Model Context Protocol
//!
//! Provides the axum handlers for the RPC endpoint, the discovery documents, and the CORS
//! layer applied to every route.

pub mod cors;
pub mod discovery;
pub mod handlers;
