//! JSON-RPC response builders
//!
//! Provides standardized mapping of internal AppErrors to JSON-RPC error messages.

use serde::Serialize;
use serde_json::json;

use crate::errors::AppError;
use crate::mcp::message::{ErrorCode, Message, RequestId};

pub fn app_error_to_json_rpc(id: Option<RequestId>, err: AppError) -> Message {
    match err {
        AppError::BadRequest { code, message } => json_rpc_error_with_data(
            id,
            ErrorCode::InvalidParams,
            "Invalid params",
            json!({
                "code": code,
                "message": message,
                "details": {}
            }),
        ),
        AppError::NotFound { code, message } => json_rpc_error_with_data(
            id,
            ErrorCode::MethodNotFound,
            "Method not found",
            json!({
                "code": code,
                "message": message,
                "details": {}
            }),
        ),
        AppError::Unauthorized { code, message, .. } => json_rpc_error_with_data(
            id,
            ErrorCode::Unauthorized,
            "Unauthorized",
            json!({
                "code": code,
                "message": message,
                "details": {}
            }),
        ),
        AppError::Forbidden { code, message, .. } => json_rpc_error_with_data(
            id,
            ErrorCode::Forbidden,
            "Forbidden",
            json!({
                "code": code,
                "message": message,
                "details": {}
            }),
        ),
        AppError::Internal { message } => {
            tracing::error!(error = %message, "handler failed with internal error");
            json_rpc_error(id, ErrorCode::InternalError, "Internal error")
        }
        other => {
            let code = other.rpc_code();
            json_rpc_error(id, code, other.public_message())
        }
    }
}

pub fn json_rpc_error(id: Option<RequestId>, code: ErrorCode, message: impl Into<String>) -> Message {
    Message::error(id, code, message)
}

pub fn json_rpc_error_with_data(
    id: Option<RequestId>,
    code: ErrorCode,
    message: &str,
    data: serde_json::Value,
) -> Message {
    Message::error_with_data(id, code.code(), message, Some(data))
}

pub fn json_rpc_result<T: Serialize>(id: Option<RequestId>, result: &T) -> Message {
    match serde_json::to_value(result) {
        Ok(value) => Message::result(id, value),
        Err(err) => {
            tracing::error!(error = %err, "result serialization failed");
            json_rpc_error(id, ErrorCode::InternalError, "Internal error")
        }
    }
}
