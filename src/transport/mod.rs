//! Stateless transport core and its host bindings
//!
//! Everything between "bytes arrived" and "bytes leave": per-call context, CORS, correlation,
//! server lifecycle, and the edge and pipe bindings. The axum binding lives in `crate::http`.

pub mod context;
pub mod correlator;
pub mod cors;
pub mod edge;
pub mod endpoint;
pub mod lifecycle;
pub mod reply;
pub mod stdio;
