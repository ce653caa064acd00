//! Axum HTTP handlers for the web server
//!
//! Provides the primary Model Context Protocol endpoint, and general metadata endpoints.

use std::error::Error as _;

use axum::{
    body::Body,
    extract::{Request, State},
    response::{IntoResponse, Response},
};
use http_body_util::LengthLimitError;
use tokio_util::sync::CancellationToken;

use crate::{errors::AppError, http::discovery, AppState};

pub async fn health(State(state): State<AppState>) -> Response {
    discovery::health(&state, "http").into_response()
}

pub async fn home(State(state): State<AppState>) -> Response {
    discovery::home(&state).into_response()
}

pub async fn protected_resource_metadata(State(state): State<AppState>) -> Response {
    discovery::protected_resource_metadata(&state).into_response()
}

pub async fn authorization_server_metadata(State(state): State<AppState>) -> Response {
    discovery::authorization_server_metadata(&state).await.into_response()
}

pub async fn not_found() -> Response {
    AppError::not_found("route_not_found", "Not found").into_response()
}

/// The RPC endpoint. Dropping this future (the client went away) aborts the call's collector.
pub async fn mcp_endpoint(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let closed = CancellationToken::new();
    let _closed_on_drop = closed.clone().drop_guard();

    let limit = state.max_body_bytes;
    state
        .mcp
        .handle(
            &parts.method,
            parts.uri.path(),
            parts.headers.clone(),
            read_body(body, limit),
            closed,
        )
        .await
        .into_response()
}

async fn read_body(body: Body, limit: usize) -> Result<axum::body::Bytes, AppError> {
    axum::body::to_bytes(body, limit).await.map_err(|err| {
        let mut source = err.source();
        while let Some(cause) = source {
            if cause.is::<LengthLimitError>() {
                return AppError::PayloadTooLarge { limit };
            }
            source = cause.source();
        }
        AppError::bad_request("unreadable_body", format!("failed to read request body: {err}"))
    })
}
