//! Bearer JWT validation against a remote JSON Web Key Set.
//!
//! The key set is cached for a fixed TTL and refreshed on the first read after it expires. A
//! token whose `kid` is missing from the cached set forces an early refresh, which covers key
//! rotation at the issuer. Forced refreshes run at most once per `MIN_FORCED_REFRESH_INTERVAL`,
//! so unknown `kid`s cannot make every call hit the issuer.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use axum::http::{header::ACCEPT, HeaderMap};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use chrono::{DateTime, Utc};
use jsonwebtoken::{
    decode, decode_header,
    errors::ErrorKind,
    jwk::{Jwk, JwkSet, KeyAlgorithm},
    Algorithm, DecodingKey, Validation,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{AuthInfo, API_REALM};
use crate::errors::AppError;

pub const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(300);
pub const MIN_FORCED_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthConfig {
    pub issuer: String,
    pub audience: String,
    pub jwks_uri: Option<String>,
    pub required_scopes: Vec<String>,
    pub authorization_servers: Vec<String>,
    /// When false, a call without a bearer token falls through to the next validator.
    pub required: bool,
}

impl OAuthConfig {
    pub fn jwks_uri(&self) -> String {
        self.jwks_uri.clone().unwrap_or_else(|| {
            format!("{}/.well-known/jwks.json", self.issuer.trim_end_matches('/'))
        })
    }

    pub fn authorization_servers(&self) -> Vec<String> {
        if self.authorization_servers.is_empty() {
            vec![self.issuer.clone()]
        } else {
            self.authorization_servers.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("missing bearer token")]
    Missing,
    #[error("token has expired")]
    Expired,
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("invalid token issuer")]
    InvalidIssuer,
    #[error("invalid token audience")]
    InvalidAudience,
    #[error("token signing key not found in key set")]
    UnknownKey,
    #[error("unable to fetch key set: {0}")]
    KeySetUnavailable(String),
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("insufficient scope")]
    InsufficientScope { missing: Vec<String> },
}

impl TokenError {
    fn code(&self) -> &'static str {
        match self {
            Self::Missing => "missing_token",
            Self::Expired => "token_expired",
            Self::InvalidSignature => "invalid_signature",
            Self::InvalidIssuer => "invalid_issuer",
            Self::InvalidAudience => "invalid_audience",
            Self::UnknownKey => "unknown_key",
            Self::KeySetUnavailable(_) => "jwks_unavailable",
            Self::Malformed(_) => "invalid_token",
            Self::InsufficientScope { .. } => "insufficient_scope",
        }
    }

    fn public_message(&self) -> &'static str {
        match self {
            Self::Missing => "Missing bearer token",
            Self::Expired => "Token has expired",
            Self::InvalidSignature => "Invalid token signature",
            Self::InvalidIssuer => "Invalid token issuer",
            Self::InvalidAudience => "Invalid token audience",
            Self::UnknownKey => "Token signing key not recognized",
            Self::KeySetUnavailable(_) => "Unable to verify token: key set unavailable",
            Self::Malformed(_) => "Invalid token",
            Self::InsufficientScope { .. } => "Insufficient scope",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidIssuer => Self::InvalidIssuer,
            ErrorKind::InvalidAudience => Self::InvalidAudience,
            _ => Self::Malformed(err.to_string()),
        }
    }
}

enum KeySource {
    Remote { uri: String, client: reqwest::Client },
    Static,
}

struct CachedKeys {
    keys: Arc<JwkSet>,
    fetched_at: Instant,
}

/// Key-set cache safe for concurrent readers; refreshes are serialized.
pub struct JwksCache {
    source: KeySource,
    ttl: Duration,
    min_refresh_interval: Duration,
    cached: RwLock<Option<CachedKeys>>,
    refresh_lock: Mutex<()>,
    last_forced: Mutex<Option<Instant>>,
}

impl JwksCache {
    pub fn remote(uri: impl Into<String>, client: reqwest::Client, ttl: Duration) -> Self {
        Self {
            source: KeySource::Remote {
                uri: uri.into(),
                client,
            },
            ttl,
            min_refresh_interval: MIN_FORCED_REFRESH_INTERVAL,
            cached: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            last_forced: Mutex::new(None),
        }
    }

    /// A fixed key set that never expires or refreshes.
    pub fn fixed(keys: JwkSet) -> Self {
        Self {
            source: KeySource::Static,
            ttl: Duration::MAX,
            min_refresh_interval: MIN_FORCED_REFRESH_INTERVAL,
            cached: RwLock::new(Some(CachedKeys {
                keys: Arc::new(keys),
                fetched_at: Instant::now(),
            })),
            refresh_lock: Mutex::new(()),
            last_forced: Mutex::new(None),
        }
    }

    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    pub async fn keys(&self) -> Result<Arc<JwkSet>, TokenError> {
        if let Some(keys) = self.fresh().await {
            return Ok(keys);
        }

        let _guard = self.refresh_lock.lock().await;
        // another caller may have refreshed while we waited
        if let Some(keys) = self.fresh().await {
            return Ok(keys);
        }
        self.fetch().await
    }

    /// Refetches regardless of age. Returns `None` without fetching when the previous forced
    /// refresh is more recent than the minimum interval. Fixed key sets are returned unchanged.
    pub async fn refresh(&self) -> Result<Option<Arc<JwkSet>>, TokenError> {
        {
            let mut last_forced = self.last_forced.lock().await;
            if let Some(at) = *last_forced {
                if at.elapsed() < self.min_refresh_interval {
                    debug!("skipping forced key set refresh, last one is too recent");
                    return Ok(None);
                }
            }
            *last_forced = Some(Instant::now());
        }

        let _guard = self.refresh_lock.lock().await;
        self.fetch().await.map(Some)
    }

    async fn fresh(&self) -> Option<Arc<JwkSet>> {
        let cached = self.cached.read().await;
        cached
            .as_ref()
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| Arc::clone(&entry.keys))
    }

    async fn fetch(&self) -> Result<Arc<JwkSet>, TokenError> {
        let KeySource::Remote { uri, client } = &self.source else {
            let cached = self.cached.read().await;
            return cached
                .as_ref()
                .map(|entry| Arc::clone(&entry.keys))
                .ok_or_else(|| TokenError::KeySetUnavailable("no keys configured".into()));
        };

        debug!(jwks_uri = %uri, "fetching key set");
        let response = client
            .get(uri)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| TokenError::KeySetUnavailable(err.to_string()))?;
        let keys: JwkSet = response
            .json()
            .await
            .map_err(|err| TokenError::KeySetUnavailable(err.to_string()))?;

        info!(jwks_uri = %uri, keys = keys.keys.len(), "key set refreshed");
        let keys = Arc::new(keys);
        *self.cached.write().await = Some(CachedKeys {
            keys: Arc::clone(&keys),
            fetched_at: Instant::now(),
        });
        Ok(keys)
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    azp: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

pub struct JwtValidator {
    config: Arc<OAuthConfig>,
    keys: JwksCache,
    resource_metadata_url: String,
}

impl JwtValidator {
    pub fn new(
        config: Arc<OAuthConfig>,
        keys: JwksCache,
        resource_metadata_url: impl Into<String>,
    ) -> Self {
        Self {
            config,
            keys,
            resource_metadata_url: resource_metadata_url.into(),
        }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// `Ok(None)` means this validator does not apply to the call: OAuth is optional and no
    /// bearer token was presented.
    pub async fn validate(&self, headers: &HeaderMap) -> Result<Option<AuthInfo>, AppError> {
        let Some(Authorization(bearer)) = headers.typed_get::<Authorization<Bearer>>() else {
            if !self.config.required {
                return Ok(None);
            }
            return Err(self.rejection(TokenError::Missing));
        };

        match self.verify_token(bearer.token()).await {
            Ok(info) => Ok(Some(info)),
            Err(err) => {
                warn!(reason = %err, "bearer token rejected");
                Err(self.rejection(err))
            }
        }
    }

    pub async fn verify_token(&self, token: &str) -> Result<AuthInfo, TokenError> {
        let header = decode_header(token).map_err(|err| TokenError::Malformed(err.to_string()))?;

        let keys = self.keys.keys().await?;
        let jwk = match find_key(&keys, header.kid.as_deref()) {
            Some(jwk) => jwk.clone(),
            None if header.kid.is_some() => {
                let refreshed = self.keys.refresh().await?.ok_or(TokenError::UnknownKey)?;
                find_key(&refreshed, header.kid.as_deref())
                    .cloned()
                    .ok_or(TokenError::UnknownKey)?
            }
            None => return Err(TokenError::UnknownKey),
        };

        let decoding_key =
            DecodingKey::from_jwk(&jwk).map_err(|err| TokenError::Malformed(err.to_string()))?;

        let mut validation = Validation::new(signing_algorithm(&jwk).unwrap_or(header.alg));
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_audience(&[&self.config.audience]);

        let claims = decode::<Claims>(token, &decoding_key, &validation)?.claims;

        let scopes = claims
            .scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect::<Vec<_>>();

        let missing = self
            .config
            .required_scopes
            .iter()
            .filter(|required| !scopes.contains(required))
            .cloned()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(TokenError::InsufficientScope { missing });
        }

        Ok(AuthInfo {
            token: token.to_string(),
            client_id: claims
                .client_id
                .or(claims.azp)
                .or(claims.sub)
                .unwrap_or_default(),
            scopes,
            expires_at: claims
                .exp
                .and_then(|exp| DateTime::<Utc>::from_timestamp(exp, 0)),
            extra: (!claims.extra.is_empty()).then_some(claims.extra),
        })
    }

    fn rejection(&self, err: TokenError) -> AppError {
        let mut challenge = format!(r#"Bearer realm="{API_REALM}""#);

        match &err {
            TokenError::Missing => {}
            TokenError::InsufficientScope { .. } => {
                challenge.push_str(r#", error="insufficient_scope""#);
                if !self.config.required_scopes.is_empty() {
                    challenge.push_str(&format!(
                        r#", scope="{}""#,
                        self.config.required_scopes.join(" ")
                    ));
                }
            }
            other => challenge.push_str(&format!(
                r#", error="invalid_token", error_description="{}""#,
                other.public_message()
            )),
        }
        challenge.push_str(&format!(
            r#", resource_metadata="{}""#,
            self.resource_metadata_url
        ));

        match err {
            TokenError::InsufficientScope { .. } => {
                AppError::forbidden(err.code(), err.public_message(), Some(challenge))
            }
            _ => AppError::unauthorized(err.code(), err.public_message(), Some(challenge)),
        }
    }
}

/// The algorithm a key declares for itself, if it is a signing algorithm.
fn signing_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    let algorithm = match jwk.common.key_algorithm.as_ref()? {
        KeyAlgorithm::HS256 => Algorithm::HS256,
        KeyAlgorithm::HS384 => Algorithm::HS384,
        KeyAlgorithm::HS512 => Algorithm::HS512,
        KeyAlgorithm::ES256 => Algorithm::ES256,
        KeyAlgorithm::ES384 => Algorithm::ES384,
        KeyAlgorithm::RS256 => Algorithm::RS256,
        KeyAlgorithm::RS384 => Algorithm::RS384,
        KeyAlgorithm::RS512 => Algorithm::RS512,
        KeyAlgorithm::PS256 => Algorithm::PS256,
        KeyAlgorithm::PS384 => Algorithm::PS384,
        KeyAlgorithm::PS512 => Algorithm::PS512,
        KeyAlgorithm::EdDSA => Algorithm::EdDSA,
        _ => return None,
    };
    Some(algorithm)
}

fn find_key<'a>(keys: &'a JwkSet, kid: Option<&str>) -> Option<&'a Jwk> {
    match kid {
        Some(kid) => keys.find(kid),
        None if keys.keys.len() == 1 => keys.keys.first(),
        None => None,
    }
}
