//! JSON-RPC message model
//!
//! A single `Message` type covers requests, notifications and responses. The kind of a unit is
//! decided on arrival from which fields are present, never from a declared type tag.

use std::fmt;

use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::errors::AppError;

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol-level error codes carried in JSON-RPC error objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    /// Transport-level rejection (method not allowed, content negotiation, shutdown).
    ServerError,
    Unauthorized,
    Forbidden,
}

impl ErrorCode {
    pub const fn code(self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ServerError => -32000,
            Self::Unauthorized => -32001,
            Self::Forbidden => -32003,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::String(value) => f.write_str(value),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Has a method and an id; exactly one reply is owed.
    Request,
    /// Has a method but no id; never replied to.
    Notification,
    /// Carries a result or an error.
    Response,
    /// Matches none of the shapes above.
    Invalid,
}

/// One JSON-RPC unit as it travels on the wire.
///
/// A `null` id is treated the same as an absent one.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: Option<RequestId>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl Message {
    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: Some(id.into()),
            method: Some(method.into()),
            params,
            ..Self::default()
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: Some(method.into()),
            params,
            ..Self::default()
        }
    }

    pub fn result(id: Option<RequestId>, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            ..Self::default()
        }
    }

    pub fn error(id: Option<RequestId>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::error_with_data(id, code.code(), message, None)
    }

    pub fn error_with_data(
        id: Option<RequestId>,
        code: i64,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            id,
            error: Some(RpcError {
                code,
                message: message.into(),
                data,
            }),
            ..Self::default()
        }
    }

    pub fn kind(&self) -> MessageKind {
        match (&self.method, &self.id) {
            (Some(_), Some(_)) => MessageKind::Request,
            (Some(_), None) => MessageKind::Notification,
            (None, _) if self.result.is_some() || self.error.is_some() => MessageKind::Response,
            (None, _) => MessageKind::Invalid,
        }
    }

    /// Requests and malformed units are both owed a reply; the latter gets an error.
    pub fn expects_reply(&self) -> bool {
        matches!(self.kind(), MessageKind::Request | MessageKind::Invalid)
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("jsonrpc", JSONRPC_VERSION)?;
        // responses always carry an id, null when the request's id is unknown
        if self.id.is_some() || self.method.is_none() {
            map.serialize_entry("id", &self.id)?;
        }
        if let Some(method) = &self.method {
            map.serialize_entry("method", method)?;
        }
        if let Some(params) = &self.params {
            map.serialize_entry("params", params)?;
        }
        if let Some(result) = &self.result {
            map.serialize_entry("result", result)?;
        }
        if let Some(error) = &self.error {
            map.serialize_entry("error", error)?;
        }
        map.end()
    }
}

/// The parsed body of one inbound call.
#[derive(Debug, Clone)]
pub struct Incoming {
    pub messages: Vec<Message>,
    pub batch: bool,
}

impl Incoming {
    /// Parses a body holding one message or a batch of them.
    ///
    /// Malformed JSON is a parse error; a non-object, non-array body or an empty batch is an
    /// invalid request. A batch element that is not a well-formed message is kept as an
    /// `Invalid` unit so it still receives an error reply.
    pub fn parse(body: &[u8]) -> Result<Self, AppError> {
        let payload: Value = serde_json::from_slice(body)
            .map_err(|err| AppError::parse(format!("malformed JSON body: {err}")))?;

        match payload {
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(AppError::invalid_request("empty batch"));
                }
                let messages = items.into_iter().map(parse_unit).collect();
                Ok(Self {
                    messages,
                    batch: true,
                })
            }
            payload @ Value::Object(_) => Ok(Self {
                messages: vec![parse_unit(payload)],
                batch: false,
            }),
            _ => Err(AppError::invalid_request(
                "body must be a JSON-RPC message or an array of messages",
            )),
        }
    }

    /// Ids owed a reply, in arrival order. `None` stands for a malformed unit without an id.
    pub fn expected_replies(&self) -> Vec<Option<RequestId>> {
        self.messages
            .iter()
            .filter(|message| message.expects_reply())
            .map(|message| message.id.clone())
            .collect()
    }
}

fn parse_unit(value: Value) -> Message {
    let fallback_id = value
        .get("id")
        .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());

    match serde_json::from_value::<Message>(value) {
        Ok(message) => message,
        Err(err) => {
            tracing::debug!(error = %err, "discarding malformed JSON-RPC unit");
            Message {
                id: fallback_id,
                ..Message::default()
            }
        }
    }
}
