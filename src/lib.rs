use std::{sync::Arc, time::Duration};

use axum::{
    middleware,
    routing::{any, get},
    Router,
};

pub mod auth;
pub mod config;
pub mod domain;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod transport;

use auth::{
    api_key::ApiKeyValidator,
    jwt::{JwksCache, JwtValidator, OAuthConfig},
    middleware::MiddlewareChain,
    AuthMode, Authenticator,
};
use config::{Config, ConfigError};
use mcp::server::ServerFactory;
use transport::{cors::CorsConfig, endpoint::McpEndpoint, lifecycle::StatelessTransport};

const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(10);

/// Immutable startup state shared by every call.
#[derive(Clone)]
pub struct AppState {
    pub endpoint_path: Arc<str>,
    pub base_url: Arc<str>,
    pub max_body_bytes: usize,
    pub cors: Arc<CorsConfig>,
    pub oauth: Option<Arc<OAuthConfig>>,
    pub mcp: McpEndpoint,
    pub http_client: reqwest::Client,
}

impl AppState {
    /// Builds the validators described by `config` and wires them to `factory`.
    pub fn from_config(
        config: &Config,
        factory: Arc<dyn ServerFactory>,
        middleware: MiddlewareChain,
        mode: AuthMode,
    ) -> Result<Self, ConfigError> {
        let http_client = reqwest::Client::builder()
            .timeout(OUTBOUND_TIMEOUT)
            .build()
            .map_err(|err| ConfigError::HttpClient(err.to_string()))?;

        let oauth = config.oauth.clone().map(|oauth| {
            let oauth = Arc::new(oauth);
            let keys = JwksCache::remote(oauth.jwks_uri(), http_client.clone(), config.jwks_cache_ttl);
            JwtValidator::new(oauth, keys, config.resource_metadata_url())
        });
        let api_key = config.api_key.clone().map(ApiKeyValidator::new);
        let authenticator = Authenticator::new(oauth, api_key, middleware);

        Ok(Self::new(config, factory, authenticator, mode, http_client))
    }

    pub fn new(
        config: &Config,
        factory: Arc<dyn ServerFactory>,
        authenticator: Authenticator,
        mode: AuthMode,
        http_client: reqwest::Client,
    ) -> Self {
        let transport = StatelessTransport::new(factory);
        Self {
            endpoint_path: Arc::from(config.endpoint.as_str()),
            base_url: Arc::from(config.base_url.as_str()),
            max_body_bytes: config.max_body_bytes,
            cors: Arc::new(config.cors.clone()),
            oauth: config.oauth.clone().map(Arc::new),
            mcp: McpEndpoint::new(Arc::new(authenticator), transport, mode),
            http_client,
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(http::handlers::health))
        .route(
            http::discovery::PROTECTED_RESOURCE_PATH,
            get(http::handlers::protected_resource_metadata),
        )
        .route(
            http::discovery::AUTHORIZATION_SERVER_PATH,
            get(http::handlers::authorization_server_metadata),
        )
        .route(&state.endpoint_path, any(http::handlers::mcp_endpoint));

    if &*state.endpoint_path != "/" {
        router = router.route("/", get(http::handlers::home));
    }

    router
        .fallback(http::handlers::not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            http::cors::cors_middleware,
        ))
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::auth::jwt::tests::{
        mint_token, test_jwks, valid_claims, TEST_AUDIENCE, TEST_ISSUER, TEST_SECRET,
    };
    use crate::mcp::server::RegistryServerFactory;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let vars = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        Config::from_lookup(|key| vars.get(key).cloned()).expect("valid config")
    }

    fn factory() -> Arc<dyn ServerFactory> {
        Arc::new(RegistryServerFactory::new(Arc::new(domain::default_registry())))
    }

    fn app_with(pairs: &[(&str, &str)]) -> Router {
        let state = AppState::from_config(
            &config(pairs),
            factory(),
            MiddlewareChain::default(),
            AuthMode::FailOpen,
        )
        .expect("state builds");
        build_app(state)
    }

    fn app() -> Router {
        app_with(&[])
    }

    /// OAuth against the in-memory test key set, with `tools:call` required.
    fn oauth_app() -> Router {
        let config = config(&[
            ("MCP_OAUTH_ISSUER", TEST_ISSUER),
            ("MCP_OAUTH_AUDIENCE", TEST_AUDIENCE),
            ("MCP_OAUTH_REQUIRED_SCOPES", "tools:call"),
            ("MCP_BASE_URL", "https://mcp.example.com"),
        ]);
        let oauth = Arc::new(config.oauth.clone().expect("oauth configured"));
        let validator = JwtValidator::new(
            oauth,
            JwksCache::fixed(test_jwks()),
            config.resource_metadata_url(),
        );
        let authenticator = Authenticator::new(Some(validator), None, MiddlewareChain::default());
        build_app(AppState::new(
            &config,
            factory(),
            authenticator,
            AuthMode::FailOpen,
            reqwest::Client::new(),
        ))
    }

    fn rpc(body: &str) -> Request<Body> {
        Request::builder()
            .uri("/mcp")
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json, text/event-stream")
            .body(Body::from(body.to_string()))
            .expect("request build")
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("GET")
            .body(Body::empty())
            .expect("request build")
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        serde_json::from_slice(&body).expect("valid json response")
    }

    #[tokio::test]
    async fn health_is_public() {
        let response = app()
            .oneshot(get_request("/health"))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"status": "ok", "transport": "http", "mode": "stateless", "auth": "none"})
        );
    }

    #[tokio::test]
    async fn health_reports_auth_mode() {
        let response = app_with(&[("MCP_API_KEY", "static-key")])
            .oneshot(get_request("/health"))
            .await
            .expect("request execution");

        assert_eq!(body_json(response).await["auth"], "api-key");
    }

    #[tokio::test]
    async fn home_lists_endpoint() {
        let response = app()
            .oneshot(get_request("/"))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["mcp_endpoint"], "/mcp");
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let response = app()
            .oneshot(get_request("/services"))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn mcp_tools_call_greets() {
        let response = app()
            .oneshot(rpc(
                r#"{"jsonrpc":"2.0","method":"tools/call","params":{"name":"greet","arguments":{"name":"Ada"}},"id":1}"#,
            ))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let body = body_json(response).await;
        assert!(body.is_object());
        assert_eq!(body["id"], 1);
        assert_eq!(body["result"]["content"][0]["text"], "Hello, Ada!");
    }

    #[tokio::test]
    async fn mcp_unknown_method_returns_method_not_found() {
        let response = app()
            .oneshot(rpc(r#"{"jsonrpc":"2.0","id":1,"method":"unknown"}"#))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32601, "message": "Method not found"}})
        );
    }

    #[tokio::test]
    async fn mcp_batch_returns_one_reply_per_request() {
        let response = app()
            .oneshot(rpc(
                r#"[{"jsonrpc":"2.0","id":1,"method":"ping"},{"jsonrpc":"2.0","method":"notifications/initialized"},{"jsonrpc":"2.0","id":2,"method":"tools/list"}]"#,
            ))
            .await
            .expect("request execution");

        let body = body_json(response).await;
        let mut ids = body
            .as_array()
            .expect("array reply")
            .iter()
            .map(|item| item["id"].as_i64().unwrap())
            .collect::<Vec<_>>();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn mcp_notification_returns_accepted_without_body() {
        let response = app()
            .oneshot(rpc(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn mcp_parse_error_for_invalid_json() {
        let response = app()
            .oneshot(rpc("{"))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32700);
        assert!(body["id"].is_null());
    }

    #[tokio::test]
    async fn mcp_get_is_method_not_allowed() {
        let response = app()
            .oneshot(get_request("/mcp"))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body_json(response).await["error"]["code"], -32000);
    }

    #[tokio::test]
    async fn mcp_requires_json_accept() {
        let request = Request::builder()
            .uri("/mcp")
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "text/plain")
            .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
            .expect("request build");

        let response = app().oneshot(request).await.expect("request execution");

        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
        assert_eq!(body_json(response).await["error"]["code"], -32000);
    }

    #[tokio::test]
    async fn mcp_requires_json_content_type() {
        let request = Request::builder()
            .uri("/mcp")
            .method("POST")
            .header(header::CONTENT_TYPE, "text/plain")
            .header(header::ACCEPT, "application/json")
            .body(Body::from("ping"))
            .expect("request build");

        let response = app().oneshot(request).await.expect("request execution");

        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn mcp_rejects_oversized_body() {
        let response = app_with(&[("MCP_MAX_BODY_BYTES", "16")])
            .oneshot(rpc(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn preflight_short_circuits_with_cors_headers() {
        let request = Request::builder()
            .uri("/mcp")
            .method("OPTIONS")
            .header(header::ORIGIN, "https://app.example.com")
            .body(Body::empty())
            .expect("request build");

        let response = oauth_app().oneshot(request).await.expect("request execution");

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
        assert!(response
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
    }

    #[tokio::test]
    async fn error_responses_carry_mirrored_origin() {
        let request = Request::builder()
            .uri("/mcp")
            .method("GET")
            .header(header::ORIGIN, "https://app.example.com")
            .body(Body::empty())
            .expect("request build");

        let response = app_with(&[("MCP_CORS_ORIGIN", "mirror")])
            .oneshot(request)
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "https://app.example.com"
        );
        assert_eq!(response.headers().get(header::VARY).unwrap(), "Origin");
    }

    #[tokio::test]
    async fn api_key_guards_the_endpoint() {
        let app = app_with(&[("MCP_API_KEY", "static-key")]);

        let denied = app
            .clone()
            .oneshot(rpc(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
            .await
            .expect("request execution");
        let mut request = rpc(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, "Bearer static-key".parse().unwrap());
        let allowed = app.oneshot(request).await.expect("request execution");

        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(denied).await["error"]["code"], -32001);
        assert_eq!(allowed.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_token_links_resource_metadata() {
        let response = oauth_app()
            .oneshot(rpc(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            r#"Bearer realm="MCP API", resource_metadata="https://mcp.example.com/.well-known/oauth-protected-resource""#
        );
    }

    #[tokio::test]
    async fn expired_token_is_reported_as_expired() {
        let mut claims = valid_claims("tools:call");
        claims["exp"] = json!(chrono::Utc::now().timestamp() - 3600);
        let mut request = rpc(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);
        request.headers_mut().insert(
            header::AUTHORIZATION,
            format!("Bearer {}", mint_token(claims, TEST_SECRET)).parse().unwrap(),
        );

        let response = oauth_app().oneshot(request).await.expect("request execution");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let message = body_json(response).await["error"]["message"]
            .as_str()
            .unwrap()
            .to_ascii_lowercase();
        assert!(message.contains("expired"));
    }

    #[tokio::test]
    async fn missing_scope_is_forbidden() {
        let mut request = rpc(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);
        request.headers_mut().insert(
            header::AUTHORIZATION,
            format!("Bearer {}", mint_token(valid_claims("tools:list"), TEST_SECRET))
                .parse()
                .unwrap(),
        );

        let response = oauth_app().oneshot(request).await.expect("request execution");

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(challenge.contains(r#"error="insufficient_scope""#));
    }

    #[tokio::test]
    async fn valid_token_reaches_tools_with_identity() {
        let mut request = rpc(
            r#"{"jsonrpc":"2.0","id":"w","method":"tools/call","params":{"name":"whoami","arguments":{}}}"#,
        );
        request.headers_mut().insert(
            header::AUTHORIZATION,
            format!("Bearer {}", mint_token(valid_claims("tools:call"), TEST_SECRET))
                .parse()
                .unwrap(),
        );

        let response = oauth_app().oneshot(request).await.expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["id"], "w");
        assert_eq!(body["result"]["structuredContent"]["client_id"], "client-abc");
    }

    #[tokio::test]
    async fn protected_resource_metadata_requires_oauth() {
        let response = app()
            .oneshot(get_request("/.well-known/oauth-protected-resource"))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn protected_resource_metadata_lists_servers() {
        let response = oauth_app()
            .oneshot(get_request("/.well-known/oauth-protected-resource"))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["resource"], "https://mcp.example.com/mcp");
        assert_eq!(body["authorization_servers"], json!([TEST_ISSUER]));
        assert_eq!(body["bearer_methods_supported"], json!(["header"]));
        assert_eq!(body["scopes_supported"], json!(["tools:call"]));
    }

    #[tokio::test]
    async fn authorization_server_metadata_falls_back_to_synthesized() {
        let response = app_with(&[
            ("MCP_OAUTH_ISSUER", "http://127.0.0.1:9"),
            ("MCP_OAUTH_AUDIENCE", TEST_AUDIENCE),
        ])
        .oneshot(get_request("/.well-known/oauth-authorization-server"))
        .await
        .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["issuer"], "http://127.0.0.1:9");
        assert_eq!(body["token_endpoint"], "http://127.0.0.1:9/token");
        assert_eq!(body["code_challenge_methods_supported"], json!(["S256"]));
    }

    #[tokio::test]
    async fn custom_endpoint_path_is_served() {
        let response = app_with(&[("MCP_ENDPOINT", "/rpc")])
            .oneshot(
                Request::builder()
                    .uri("/rpc")
                    .method("POST")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::ACCEPT, "*/*")
                    .body(Body::from(r#"{"jsonrpc":"2.0","id":5,"method":"ping"}"#))
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["id"], 5);
    }
}
