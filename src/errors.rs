use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::mcp::message::{ErrorCode, JSONRPC_VERSION};
use crate::transport::reply::HttpReply;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("parse error: {message}")]
    Parse { message: String },
    #[error("invalid request: {message}")]
    InvalidRequest { message: &'static str },
    #[error("bad request: {message}")]
    BadRequest { code: &'static str, message: String },
    #[error("not found: {message}")]
    NotFound { code: &'static str, message: String },
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("not acceptable: {message}")]
    NotAcceptable { message: &'static str },
    #[error("unsupported media type: {message}")]
    UnsupportedMediaType { message: &'static str },
    #[error("payload too large: limit is {limit} bytes")]
    PayloadTooLarge { limit: usize },
    #[error("unauthorized: {message}")]
    Unauthorized {
        code: &'static str,
        message: String,
        challenge: Option<String>,
    },
    #[error("forbidden: {message}")]
    Forbidden {
        code: &'static str,
        message: String,
        challenge: Option<String>,
    },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: &'static str },
    #[error("internal error")]
    Internal { message: String },
}

impl AppError {
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    pub fn invalid_request(message: &'static str) -> Self {
        Self::InvalidRequest { message }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::NotFound {
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(
        code: &'static str,
        message: impl Into<String>,
        challenge: Option<String>,
    ) -> Self {
        Self::Unauthorized {
            code,
            message: message.into(),
            challenge,
        }
    }

    pub fn forbidden(
        code: &'static str,
        message: impl Into<String>,
        challenge: Option<String>,
    ) -> Self {
        Self::Forbidden {
            code,
            message: message.into(),
            challenge,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Parse { .. } | Self::InvalidRequest { .. } | Self::BadRequest { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::NotAcceptable { .. } => StatusCode::NOT_ACCEPTABLE,
            Self::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn rpc_code(&self) -> ErrorCode {
        match self {
            Self::Parse { .. } => ErrorCode::ParseError,
            Self::InvalidRequest { .. } => ErrorCode::InvalidRequest,
            Self::BadRequest { .. } => ErrorCode::InvalidParams,
            Self::NotFound { .. } => ErrorCode::MethodNotFound,
            Self::MethodNotAllowed
            | Self::NotAcceptable { .. }
            | Self::UnsupportedMediaType { .. }
            | Self::PayloadTooLarge { .. }
            | Self::ServiceUnavailable { .. } => ErrorCode::ServerError,
            Self::Unauthorized { .. } => ErrorCode::Unauthorized,
            Self::Forbidden { .. } => ErrorCode::Forbidden,
            Self::Internal { .. } => ErrorCode::InternalError,
        }
    }

    /// Message safe to show to callers. Internal detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Parse { .. } => "Parse error".to_string(),
            Self::InvalidRequest { message } => format!("Invalid Request: {message}"),
            Self::BadRequest { message, .. } | Self::NotFound { message, .. } => message.clone(),
            Self::MethodNotAllowed => "Method not allowed".to_string(),
            Self::NotAcceptable { message } | Self::UnsupportedMediaType { message } => {
                message.to_string()
            }
            Self::PayloadTooLarge { .. } => "Request body too large".to_string(),
            Self::Unauthorized { message, .. } | Self::Forbidden { message, .. } => {
                message.clone()
            }
            Self::ServiceUnavailable { message } => format!("Service unavailable: {message}"),
            Self::Internal { .. } => "Internal server error".to_string(),
        }
    }

    fn challenge(&self) -> Option<&str> {
        match self {
            Self::Unauthorized { challenge, .. } | Self::Forbidden { challenge, .. } => {
                challenge.as_deref()
            }
            _ => None,
        }
    }

    /// Builds the transport-level reply: status, optional challenge and a JSON-RPC error body
    /// with a null id.
    pub fn into_reply(self) -> HttpReply {
        if let Self::Internal { message } = &self {
            tracing::error!(error = %message, "request failed with internal error");
        }

        let body = json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": null,
            "error": {
                "code": self.rpc_code().code(),
                "message": self.public_message(),
            }
        });

        let mut reply = HttpReply::json(self.status(), body);
        if let Some(challenge) = self.challenge() {
            match HeaderValue::from_str(challenge) {
                Ok(value) => reply = reply.with_header(header::WWW_AUTHENTICATE, value),
                Err(_) => tracing::warn!("dropping unencodable WWW-Authenticate challenge"),
            }
        }
        reply
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.into_reply().into_response()
    }
}
