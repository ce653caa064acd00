//! CORS headers computed from static configuration, shared by every host binding.

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};

use super::reply::HttpReply;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigin {
    /// `Access-Control-Allow-Origin: *`
    Any,
    /// A single configured origin.
    Exact(String),
    /// Echo the caller's `Origin`, falling back to `*` when there is none.
    Mirror,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsConfig {
    pub origin: CorsOrigin,
    pub methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub exposed_headers: Vec<String>,
    pub credentials: bool,
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origin: CorsOrigin::Any,
            methods: vec!["GET".into(), "POST".into(), "OPTIONS".into()],
            allowed_headers: vec![
                "Content-Type".into(),
                "Authorization".into(),
                "mcp-session-id".into(),
                "mcp-protocol-version".into(),
            ],
            exposed_headers: vec![
                "Content-Type".into(),
                "Authorization".into(),
                "mcp-session-id".into(),
            ],
            credentials: false,
            max_age: Some(86_400),
        }
    }
}

pub fn resolve_origin(config: &CorsConfig, request_origin: Option<&str>) -> String {
    match (&config.origin, request_origin) {
        (CorsOrigin::Any, _) => "*".to_string(),
        (CorsOrigin::Exact(origin), _) => origin.clone(),
        (CorsOrigin::Mirror, Some(origin)) => origin.to_string(),
        (CorsOrigin::Mirror, None) => "*".to_string(),
    }
}

pub fn cors_headers(config: &CorsConfig, request_origin: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();

    let origin = resolve_origin(config, request_origin);
    insert(&mut headers, header::ACCESS_CONTROL_ALLOW_ORIGIN, &origin);
    if origin != "*" && config.origin == CorsOrigin::Mirror {
        headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    }

    insert(
        &mut headers,
        header::ACCESS_CONTROL_ALLOW_METHODS,
        &config.methods.join(", "),
    );
    insert(
        &mut headers,
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        &config.allowed_headers.join(", "),
    );
    if !config.exposed_headers.is_empty() {
        insert(
            &mut headers,
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            &config.exposed_headers.join(", "),
        );
    }
    if config.credentials {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
    }
    if let Some(max_age) = config.max_age {
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from(max_age));
    }

    headers
}

/// Answer to an `OPTIONS` preflight. Runs before any auth or correlation.
pub fn preflight_reply(config: &CorsConfig, request_origin: Option<&str>) -> HttpReply {
    HttpReply::empty(StatusCode::NO_CONTENT).with_headers(cors_headers(config, request_origin))
}

fn insert(headers: &mut HeaderMap, name: header::HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::debug!(header = %name, "skipping unencodable CORS header value"),
    }
}
