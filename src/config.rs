use std::{env, net::SocketAddr, time::Duration};

use thiserror::Error;

use crate::auth::jwt::{OAuthConfig, DEFAULT_JWKS_TTL};
use crate::transport::cors::{CorsConfig, CorsOrigin};

pub const DEFAULT_BIND_PORT: u16 = 3001;
pub const DEFAULT_ENDPOINT: &str = "/mcp";
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Http,
    Stdio,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub transport: TransportKind,
    pub bind_addr: String,
    pub bind_port: u16,
    pub endpoint: String,
    pub base_url: String,
    pub max_body_bytes: usize,
    pub debug: bool,
    pub api_key: Option<String>,
    pub oauth: Option<OAuthConfig>,
    pub jwks_cache_ttl: Duration,
    pub cors: CorsConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("MCP_TRANSPORT must be one of: http, stdio")]
    InvalidTransport,
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("invalid bind address or port")]
    InvalidSocket,
    #[error("MCP_ENDPOINT must start with '/'")]
    InvalidEndpoint,
    #[error("{0} must be a positive integer")]
    InvalidNumber(&'static str),
    #[error("{0} must be true or false")]
    InvalidBool(&'static str),
    #[error("MCP_OAUTH_ISSUER and MCP_OAUTH_AUDIENCE must be set together")]
    IncompleteOAuth,
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let transport = match get("MCP_TRANSPORT").as_deref() {
            None | Some("http") => TransportKind::Http,
            Some("stdio") => TransportKind::Stdio,
            Some(_) => return Err(ConfigError::InvalidTransport),
        };

        let bind_addr = get("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string());
        let bind_port = get("BIND_PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(DEFAULT_BIND_PORT);

        let endpoint = get("MCP_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        if !endpoint.starts_with('/') {
            return Err(ConfigError::InvalidEndpoint);
        }

        let base_url = get("MCP_BASE_URL")
            .unwrap_or_else(|| format!("http://{bind_addr}:{bind_port}"))
            .trim_end_matches('/')
            .to_string();

        let max_body_bytes = parse_positive(get("MCP_MAX_BODY_BYTES"), "MCP_MAX_BODY_BYTES")?
            .map(|value| value as usize)
            .unwrap_or(DEFAULT_MAX_BODY_BYTES);
        let debug = parse_bool(get("MCP_DEBUG"), "MCP_DEBUG")?.unwrap_or(false);
        let api_key = get("MCP_API_KEY");

        let oauth = match (get("MCP_OAUTH_ISSUER"), get("MCP_OAUTH_AUDIENCE")) {
            (Some(issuer), Some(audience)) => Some(OAuthConfig {
                issuer: issuer.trim_end_matches('/').to_string(),
                audience,
                jwks_uri: get("MCP_OAUTH_JWKS_URI"),
                required_scopes: split_list(get("MCP_OAUTH_REQUIRED_SCOPES"), &[' ', ',']),
                authorization_servers: split_list(get("MCP_OAUTH_AUTHORIZATION_SERVERS"), &[',']),
                required: parse_bool(get("MCP_OAUTH_REQUIRED"), "MCP_OAUTH_REQUIRED")?
                    .unwrap_or(true),
            }),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteOAuth),
        };
        let jwks_cache_ttl = parse_positive(get("MCP_JWKS_CACHE_TTL_SECS"), "MCP_JWKS_CACHE_TTL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_JWKS_TTL);

        let defaults = CorsConfig::default();
        let cors = CorsConfig {
            origin: match get("MCP_CORS_ORIGIN").as_deref() {
                None | Some("*") => CorsOrigin::Any,
                Some("mirror") => CorsOrigin::Mirror,
                Some(origin) => CorsOrigin::Exact(origin.to_string()),
            },
            methods: non_empty_or(split_list(get("MCP_CORS_METHODS"), &[',']), defaults.methods),
            allowed_headers: non_empty_or(
                split_list(get("MCP_CORS_ALLOWED_HEADERS"), &[',']),
                defaults.allowed_headers,
            ),
            exposed_headers: non_empty_or(
                split_list(get("MCP_CORS_EXPOSED_HEADERS"), &[',']),
                defaults.exposed_headers,
            ),
            credentials: parse_bool(get("MCP_CORS_CREDENTIALS"), "MCP_CORS_CREDENTIALS")?
                .unwrap_or(defaults.credentials),
            max_age: parse_positive(get("MCP_CORS_MAX_AGE"), "MCP_CORS_MAX_AGE")?
                .or(defaults.max_age),
        };

        let config = Self {
            transport,
            bind_addr,
            bind_port,
            endpoint,
            base_url,
            max_body_bytes,
            debug,
            api_key,
            oauth,
            jwks_cache_ttl,
            cors,
        };

        if config.transport == TransportKind::Http {
            let _ = config.bind_socket()?;
        }
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }

    pub fn resource_metadata_url(&self) -> String {
        format!("{}/.well-known/oauth-protected-resource", self.base_url)
    }
}

fn parse_positive(value: Option<String>, key: &'static str) -> Result<Option<u64>, ConfigError> {
    value
        .map(|value| match value.parse::<u64>() {
            Ok(parsed) if parsed > 0 => Ok(parsed),
            _ => Err(ConfigError::InvalidNumber(key)),
        })
        .transpose()
}

fn parse_bool(value: Option<String>, key: &'static str) -> Result<Option<bool>, ConfigError> {
    value
        .map(|value| match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidBool(key)),
        })
        .transpose()
}

fn split_list(value: Option<String>, separators: &[char]) -> Vec<String> {
    value
        .map(|value| {
            value
                .split(separators)
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn non_empty_or(values: Vec<String>, fallback: Vec<String>) -> Vec<String> {
    if values.is_empty() {
        fallback
    } else {
        values
    }
}
