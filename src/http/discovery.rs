//! Unauthenticated discovery and metadata documents
//!
//! Shared by the axum router and the edge binding, so everything here returns an `HttpReply`.

use axum::http::{header::ACCEPT, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{auth::jwt::OAuthConfig, errors::AppError, transport::reply::HttpReply, AppState};

pub const PROTECTED_RESOURCE_PATH: &str = "/.well-known/oauth-protected-resource";
pub const AUTHORIZATION_SERVER_PATH: &str = "/.well-known/oauth-authorization-server";
const OPENID_CONFIGURATION_PATH: &str = "/.well-known/openid-configuration";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub transport: &'static str,
    pub mode: &'static str,
    pub auth: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HomeResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub mcp_endpoint: String,
    pub health: &'static str,
}

/// RFC 9728 protected resource metadata.
#[derive(Debug, Serialize)]
pub struct ProtectedResourceMetadata {
    pub resource: String,
    pub authorization_servers: Vec<String>,
    pub bearer_methods_supported: Vec<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scopes_supported: Vec<String>,
    pub resource_name: &'static str,
}

#[derive(Debug, Serialize)]
pub struct AuthorizationServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    pub response_types_supported: Vec<&'static str>,
    pub grant_types_supported: Vec<&'static str>,
    pub code_challenge_methods_supported: Vec<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scopes_supported: Vec<String>,
}

pub fn health(state: &AppState, transport: &'static str) -> HttpReply {
    let body = HealthResponse {
        status: "ok",
        transport,
        mode: "stateless",
        auth: state.mcp.authenticator().describe(),
    };
    HttpReply::json(
        StatusCode::OK,
        serde_json::to_value(body).expect("health response serialization"),
    )
}

pub fn home(state: &AppState) -> HttpReply {
    let body = HomeResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        mcp_endpoint: state.endpoint_path.to_string(),
        health: "/health",
    };
    HttpReply::json(
        StatusCode::OK,
        serde_json::to_value(body).expect("home response serialization"),
    )
}

pub fn protected_resource_metadata(state: &AppState) -> HttpReply {
    let Some(oauth) = state.oauth.as_deref() else {
        return oauth_not_configured();
    };

    let body = ProtectedResourceMetadata {
        resource: format!("{}{}", state.base_url, state.endpoint_path),
        authorization_servers: oauth.authorization_servers(),
        bearer_methods_supported: vec!["header"],
        scopes_supported: oauth.required_scopes.clone(),
        resource_name: env!("CARGO_PKG_NAME"),
    };
    HttpReply::json(
        StatusCode::OK,
        serde_json::to_value(body).expect("protected resource metadata serialization"),
    )
}

/// Proxies the authorization server's own metadata, trying the OAuth document before the
/// OpenID one. If neither is reachable a minimal document is synthesized from configuration.
pub async fn authorization_server_metadata(state: &AppState) -> HttpReply {
    let Some(oauth) = state.oauth.as_deref() else {
        return oauth_not_configured();
    };

    let server = oauth
        .authorization_servers()
        .into_iter()
        .next()
        .unwrap_or_else(|| oauth.issuer.clone());
    let server = server.trim_end_matches('/');

    for path in [AUTHORIZATION_SERVER_PATH, OPENID_CONFIGURATION_PATH] {
        let url = format!("{server}{path}");
        match fetch_metadata(&state.http_client, &url).await {
            Ok(document) => {
                info!(url = %url, "authorization server metadata proxied");
                return HttpReply::json(StatusCode::OK, document);
            }
            Err(err) => debug!(url = %url, error = %err, "authorization server metadata fetch failed"),
        }
    }

    warn!(issuer = %oauth.issuer, "authorization server unreachable, serving synthesized metadata");
    HttpReply::json(
        StatusCode::OK,
        serde_json::to_value(synthesized_metadata(oauth))
            .expect("authorization server metadata serialization"),
    )
}

pub fn synthesized_metadata(oauth: &OAuthConfig) -> AuthorizationServerMetadata {
    let issuer = oauth.issuer.trim_end_matches('/');
    AuthorizationServerMetadata {
        issuer: issuer.to_string(),
        authorization_endpoint: format!("{issuer}/authorize"),
        token_endpoint: format!("{issuer}/token"),
        jwks_uri: oauth.jwks_uri(),
        response_types_supported: vec!["code"],
        grant_types_supported: vec!["authorization_code", "refresh_token"],
        code_challenge_methods_supported: vec!["S256"],
        scopes_supported: oauth.required_scopes.clone(),
    }
}

async fn fetch_metadata(client: &reqwest::Client, url: &str) -> Result<Value, reqwest::Error> {
    client
        .get(url)
        .header(ACCEPT, "application/json")
        .send()
        .await?
        .error_for_status()?
        .json::<Value>()
        .await
}

fn oauth_not_configured() -> HttpReply {
    AppError::not_found("oauth_not_configured", "OAuth is not configured").into_reply()
}
