//! Host-native binding for edge and worker runtimes
//!
//! The host hands over a fully materialized `http::Request<Bytes>` and expects an
//! `http::Response<Bytes>` back. Routing, CORS and discovery are handled here. The binding fails
//! closed: a deployment with no auth mechanism at all rejects every RPC call.

use axum::{
    body::Bytes,
    http::{header, Method, Request, Response},
};
use tokio_util::sync::CancellationToken;

use crate::{
    errors::AppError,
    http::discovery,
    transport::{
        cors::{cors_headers, preflight_reply},
        endpoint::check_body_size,
        reply::HttpReply,
    },
    AppState,
};

#[derive(Clone)]
pub struct EdgeHandler {
    state: AppState,
}

impl EdgeHandler {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn fetch(&self, request: Request<Bytes>) -> Response<Bytes> {
        let origin = request
            .headers()
            .get(header::ORIGIN)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        if request.method() == Method::OPTIONS {
            return preflight_reply(&self.state.cors, origin.as_deref()).into_http();
        }

        // The host dropping this future aborts the call and tears its server down.
        let closed = CancellationToken::new();
        let _closed_on_drop = closed.clone().drop_guard();

        self.route(request, closed)
            .await
            .with_headers(cors_headers(&self.state.cors, origin.as_deref()))
            .into_http()
    }

    async fn route(&self, request: Request<Bytes>, closed: CancellationToken) -> HttpReply {
        let (parts, body) = request.into_parts();
        let path = parts.uri.path();

        if path == &*self.state.endpoint_path {
            let limit = self.state.max_body_bytes;
            return self
                .state
                .mcp
                .handle(
                    &parts.method,
                    path,
                    parts.headers.clone(),
                    async move { check_body_size(body, limit) },
                    closed,
                )
                .await;
        }

        if parts.method != Method::GET {
            return not_found();
        }
        match path {
            "/health" => discovery::health(&self.state, "edge"),
            discovery::PROTECTED_RESOURCE_PATH => discovery::protected_resource_metadata(&self.state),
            discovery::AUTHORIZATION_SERVER_PATH => {
                discovery::authorization_server_metadata(&self.state).await
            }
            "/" => discovery::home(&self.state),
            _ => not_found(),
        }
    }
}

fn not_found() -> HttpReply {
    AppError::not_found("route_not_found", "Not found").into_reply()
}
