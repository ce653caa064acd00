//! Per-call ambient data, passed explicitly down the call path.

use std::sync::Arc;

use axum::http::HeaderMap;
use uuid::Uuid;

use crate::auth::AuthInfo;

/// Everything a single inbound call knows about itself.
///
/// Created when the call starts and dropped when it ends. Downstream steps receive derived
/// copies (`with_auth`, `for_tool`) and never mutate a context owned by another call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    call_id: Arc<str>,
    headers: Arc<HeaderMap>,
    auth: Option<Arc<AuthInfo>>,
    tool_name: Option<Arc<str>>,
}

impl RequestContext {
    pub fn new(headers: HeaderMap) -> Self {
        Self::with_call_id(Uuid::new_v4().to_string(), headers)
    }

    pub fn with_call_id(call_id: impl Into<Arc<str>>, headers: HeaderMap) -> Self {
        Self {
            call_id: call_id.into(),
            headers: Arc::new(headers),
            auth: None,
            tool_name: None,
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn auth(&self) -> Option<&AuthInfo> {
        self.auth.as_deref()
    }

    pub fn with_auth(mut self, auth: Option<AuthInfo>) -> Self {
        self.auth = auth.map(Arc::new);
        self
    }

    pub fn tool_name(&self) -> Option<&str> {
        self.tool_name.as_deref()
    }

    /// Context for one tool invocation within this call.
    pub fn for_tool(&self, name: &str) -> Self {
        Self {
            tool_name: Some(Arc::from(name)),
            ..self.clone()
        }
    }
}
