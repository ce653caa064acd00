//! Caller authentication
//!
//! Two independent validators (bearer JWT, static API key) followed by an optional
//! user-supplied middleware chain. OAuth is tried first; its failures reject the call outright.
//! The API key is only consulted when OAuth does not apply.

pub mod api_key;
pub mod jwt;
pub mod middleware;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    errors::AppError,
    transport::{context::RequestContext, reply::HttpReply},
};
use api_key::ApiKeyValidator;
use jwt::JwtValidator;
use middleware::{ChainResult, InboundRequest, MiddlewareChain};

pub const API_REALM: &str = "MCP API";

/// Resolved caller identity. Its absence means no authentication was performed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthInfo {
    #[serde(skip_serializing)]
    pub token: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub extra: Option<Map<String, Value>>,
}

/// How a host binding treats a deployment with no auth mechanism at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// No validator and no middleware: let the call through.
    FailOpen,
    /// No validator and no middleware: reject with 401.
    FailClosed,
}

#[derive(Debug)]
pub enum AuthDecision {
    Proceed(Option<AuthInfo>),
    Respond(HttpReply),
}

#[derive(Default)]
pub struct Authenticator {
    oauth: Option<JwtValidator>,
    api_key: Option<ApiKeyValidator>,
    middleware: MiddlewareChain,
}

impl Authenticator {
    pub fn new(
        oauth: Option<JwtValidator>,
        api_key: Option<ApiKeyValidator>,
        middleware: MiddlewareChain,
    ) -> Self {
        Self {
            oauth,
            api_key,
            middleware,
        }
    }

    /// Label reported by the health endpoint.
    pub fn describe(&self) -> &'static str {
        match (self.oauth.is_some(), self.api_key.is_some()) {
            (true, true) => "oauth+api-key",
            (true, false) => "oauth",
            (false, true) => "api-key",
            (false, false) => "none",
        }
    }

    pub fn has_mechanism(&self) -> bool {
        self.oauth.is_some() || self.api_key.is_some() || !self.middleware.is_empty()
    }

    pub async fn authorize(
        &self,
        request: &InboundRequest,
        ctx: &RequestContext,
        mode: AuthMode,
    ) -> AuthDecision {
        let identity = match self.validate(ctx).await {
            Ok(identity) => identity,
            Err(err) => return AuthDecision::Respond(err.into_reply()),
        };

        if !self.middleware.is_empty() {
            return match self.middleware.run(request, ctx, identity).await {
                ChainResult::Proceed(identity) => AuthDecision::Proceed(identity),
                ChainResult::Respond(reply) => AuthDecision::Respond(reply),
            };
        }

        if mode == AuthMode::FailClosed && !self.has_mechanism() {
            debug!(call_id = %ctx.call_id(), "no auth mechanism configured, failing closed");
            return AuthDecision::Respond(
                AppError::unauthorized(
                    "no_auth_configured",
                    "Unauthorized",
                    Some(format!(r#"Bearer realm="{API_REALM}""#)),
                )
                .into_reply(),
            );
        }

        AuthDecision::Proceed(identity)
    }

    async fn validate(&self, ctx: &RequestContext) -> Result<Option<AuthInfo>, AppError> {
        if let Some(oauth) = &self.oauth {
            if let Some(info) = oauth.validate(ctx.headers()).await? {
                return Ok(Some(info));
            }
        }

        match &self.api_key {
            Some(api_key) => api_key.validate(ctx.headers()).map(Some),
            None => Ok(None),
        }
    }
}
