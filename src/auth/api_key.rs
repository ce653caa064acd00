use std::sync::Arc;

use axum::http::{header, HeaderMap, HeaderName};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use subtle::ConstantTimeEq;

use super::{AuthInfo, API_REALM};
use crate::errors::AppError;

pub const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");
pub const API_KEY_CLIENT_ID: &str = "api-key";

/// Static shared-secret check.
#[derive(Debug, Clone)]
pub struct ApiKeyValidator {
    key: Arc<str>,
}

impl ApiKeyValidator {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self { key: key.into() }
    }

    /// Accepts the key as a bearer token, an `x-api-key` header, or the raw `Authorization`
    /// value. Anything else, including no credential at all, is a 401.
    pub fn validate(&self, headers: &HeaderMap) -> Result<AuthInfo, AppError> {
        let Some(presented) = presented_key(headers) else {
            return Err(AppError::unauthorized(
                "missing_api_key",
                "Missing API key",
                Some(challenge()),
            ));
        };

        if !bool::from(presented.as_bytes().ct_eq(self.key.as_bytes())) {
            return Err(AppError::unauthorized(
                "invalid_api_key",
                "Invalid API key",
                Some(challenge()),
            ));
        }

        Ok(AuthInfo {
            token: presented,
            client_id: API_KEY_CLIENT_ID.to_string(),
            scopes: Vec::new(),
            expires_at: None,
            extra: None,
        })
    }
}

fn presented_key(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers.typed_get::<Authorization<Bearer>>() {
        return Some(auth.token().to_string());
    }

    headers
        .get(API_KEY_HEADER)
        .or_else(|| headers.get(header::AUTHORIZATION))
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn challenge() -> String {
    format!(r#"Bearer realm="{API_REALM}""#)
}
