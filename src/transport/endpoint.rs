//! Host-neutral handling of the RPC endpoint
//!
//! Every HTTP-shaped binding funnels its calls through `McpEndpoint::handle`: method, content
//! negotiation, authentication, body, then the stateless exchange. Bindings only differ in
//! how the body bytes are obtained and how the reply is written back.

use std::{future::Future, sync::Arc};

use axum::{
    body::Bytes,
    http::{header, HeaderMap, HeaderValue, Method},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    auth::{middleware::InboundRequest, AuthDecision, AuthMode, Authenticator},
    errors::AppError,
    transport::{context::RequestContext, lifecycle::StatelessTransport, reply::HttpReply},
};

#[derive(Clone)]
pub struct McpEndpoint {
    authenticator: Arc<Authenticator>,
    transport: StatelessTransport,
    mode: AuthMode,
}

impl McpEndpoint {
    pub fn new(authenticator: Arc<Authenticator>, transport: StatelessTransport, mode: AuthMode) -> Self {
        Self {
            authenticator,
            transport,
            mode,
        }
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    /// Serves one call. `body` is only polled once the caller is authenticated.
    pub async fn handle<B>(
        &self,
        method: &Method,
        path: &str,
        headers: HeaderMap,
        body: B,
        closed: CancellationToken,
    ) -> HttpReply
    where
        B: Future<Output = Result<Bytes, AppError>>,
    {
        if method != Method::POST {
            return AppError::MethodNotAllowed
                .into_reply()
                .with_header(header::ALLOW, HeaderValue::from_static("POST, OPTIONS"));
        }
        if let Err(err) = check_accept(&headers) {
            return err.into_reply();
        }
        if let Err(err) = check_content_type(&headers) {
            return err.into_reply();
        }

        let ctx = RequestContext::new(headers);
        let request = InboundRequest {
            method: method.clone(),
            path: path.to_string(),
        };
        let ctx = match self.authenticator.authorize(&request, &ctx, self.mode).await {
            AuthDecision::Proceed(identity) => ctx.with_auth(identity),
            AuthDecision::Respond(reply) => return reply,
        };

        let body = match body.await {
            Ok(body) => body,
            Err(err) => {
                debug!(call_id = %ctx.call_id(), error = %err, "rejecting request body");
                return err.into_reply();
            }
        };

        self.transport.handle_call(ctx, &body, closed).await
    }
}

/// `Accept` must admit JSON. A missing header does not.
pub fn check_accept(headers: &HeaderMap) -> Result<(), AppError> {
    let accepted = headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(media_type)
        .any(|media| {
            media.eq_ignore_ascii_case("application/json")
                || media.eq_ignore_ascii_case("application/*")
                || media == "*/*"
        });

    if accepted {
        Ok(())
    } else {
        Err(AppError::NotAcceptable {
            message: "Not Acceptable: Client must accept application/json",
        })
    }
}

pub fn check_content_type(headers: &HeaderMap) -> Result<(), AppError> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(media_type)
        .is_some_and(|media| media.eq_ignore_ascii_case("application/json"));

    if is_json {
        Ok(())
    } else {
        Err(AppError::UnsupportedMediaType {
            message: "Unsupported Media Type: Content-Type must be application/json",
        })
    }
}

/// Enforces the body limit on an already materialized body.
pub fn check_body_size(body: Bytes, limit: usize) -> Result<Bytes, AppError> {
    if body.len() > limit {
        Err(AppError::PayloadTooLarge { limit })
    } else {
        Ok(body)
    }
}

fn media_type(value: &str) -> &str {
    value.split(';').next().unwrap_or_default().trim()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use axum::http::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::{domain, mcp::server::RegistryServerFactory};

    fn endpoint(mode: AuthMode) -> McpEndpoint {
        let factory = RegistryServerFactory::new(Arc::new(domain::default_registry()));
        McpEndpoint::new(
            Arc::new(Authenticator::default()),
            StatelessTransport::new(Arc::new(factory)),
            mode,
        )
    }

    fn json_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json, text/event-stream"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json; charset=utf-8"));
        headers
    }

    async fn post(endpoint: &McpEndpoint, headers: HeaderMap, body: &str) -> HttpReply {
        let body = Bytes::from(body.to_string());
        endpoint
            .handle(&Method::POST, "/mcp", headers, async { Ok(body) }, CancellationToken::new())
            .await
    }

    #[test]
    fn accept_negotiation() {
        let mut headers = HeaderMap::new();
        assert!(check_accept(&headers).is_err());

        headers.insert(header::ACCEPT, HeaderValue::from_static("text/plain"));
        assert!(check_accept(&headers).is_err());

        headers.insert(header::ACCEPT, HeaderValue::from_static("text/html, application/*;q=0.8"));
        assert!(check_accept(&headers).is_ok());

        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        assert!(check_accept(&headers).is_ok());
    }

    #[test]
    fn content_type_must_be_json() {
        let mut headers = HeaderMap::new();
        assert!(check_content_type(&headers).is_err());

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        assert!(check_content_type(&headers).is_err());

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("Application/JSON"));
        assert!(check_content_type(&headers).is_ok());
    }

    #[test]
    fn body_limit_is_inclusive() {
        assert!(check_body_size(Bytes::from_static(b"1234"), 4).is_ok());
        assert!(matches!(
            check_body_size(Bytes::from_static(b"12345"), 4),
            Err(AppError::PayloadTooLarge { limit: 4 })
        ));
    }

    #[tokio::test]
    async fn non_post_is_method_not_allowed() {
        let reply = endpoint(AuthMode::FailOpen)
            .handle(
                &Method::GET,
                "/mcp",
                json_headers(),
                async { Ok(Bytes::new()) },
                CancellationToken::new(),
            )
            .await;

        assert_eq!(reply.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(reply.body.unwrap()["error"]["code"], -32000);
    }

    #[tokio::test]
    async fn text_accept_is_not_acceptable() {
        let mut headers = json_headers();
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/plain"));

        let reply = post(&endpoint(AuthMode::FailOpen), headers, "{}").await;

        assert_eq!(reply.status, StatusCode::NOT_ACCEPTABLE);
        assert_eq!(reply.body.unwrap()["error"]["code"], -32000);
    }

    #[tokio::test]
    async fn fail_closed_rejects_before_reading_body() {
        let read = Arc::new(AtomicBool::new(false));
        let body_read = Arc::clone(&read);

        let reply = endpoint(AuthMode::FailClosed)
            .handle(
                &Method::POST,
                "/mcp",
                json_headers(),
                async move {
                    body_read.store(true, Ordering::SeqCst);
                    Ok(Bytes::new())
                },
                CancellationToken::new(),
            )
            .await;

        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        assert!(!read.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn body_errors_are_reported() {
        let reply = endpoint(AuthMode::FailOpen)
            .handle(
                &Method::POST,
                "/mcp",
                json_headers(),
                async { Err(AppError::PayloadTooLarge { limit: 8 }) },
                CancellationToken::new(),
            )
            .await;

        assert_eq!(reply.status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn greets_with_open_access() {
        let body = json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": {"name": "greet", "arguments": {"name": "Ada"}},
            "id": 1
        });

        let reply = post(&endpoint(AuthMode::FailOpen), json_headers(), &body.to_string()).await;

        let body = reply.body.unwrap();
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(body["id"], 1);
        assert_eq!(body["result"]["content"][0]["text"], "Hello, Ada!");
    }
}
