//! User-supplied authorization chain.
//!
//! Handlers run in order. Each receives a [`Next`] token which it may consume exactly once to
//! let the chain advance, optionally resolving the caller's identity on the way. Returning a
//! response instead short-circuits the chain. The runner iterates over the handler list rather
//! than nesting closures, so chain length never grows the call stack.

use std::{panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use axum::http::Method;
use futures::FutureExt;
use tracing::{debug, error};

use super::AuthInfo;
use crate::{errors::AppError, transport::context::RequestContext, transport::reply::HttpReply};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The parts of an inbound call visible to middleware.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub path: String,
}

/// Proof that a handler consumed its [`Next`]. Only `Next` can construct one.
#[derive(Debug)]
pub struct Proceed {
    index: usize,
    identity: Option<AuthInfo>,
}

#[derive(Debug)]
pub enum MiddlewareOutcome {
    /// Stop here and send this reply.
    Respond(HttpReply),
    /// Advance to the next handler.
    Continue(Proceed),
    /// The handler failed; the call gets a generic 500.
    Error(BoxError),
}

/// Continuation handed to one handler invocation.
#[derive(Debug)]
pub struct Next {
    index: usize,
}

impl Next {
    /// Advance without changing the resolved identity.
    pub fn run(self) -> MiddlewareOutcome {
        MiddlewareOutcome::Continue(Proceed {
            index: self.index,
            identity: None,
        })
    }

    /// Advance and resolve the caller's identity.
    pub fn run_with(self, auth: AuthInfo) -> MiddlewareOutcome {
        MiddlewareOutcome::Continue(Proceed {
            index: self.index,
            identity: Some(auth),
        })
    }
}

#[async_trait]
pub trait MiddlewareHandler: Send + Sync {
    async fn handle(
        &self,
        request: &InboundRequest,
        ctx: &RequestContext,
        next: Next,
    ) -> MiddlewareOutcome;
}

#[derive(Debug)]
pub enum ChainResult {
    Proceed(Option<AuthInfo>),
    Respond(HttpReply),
}

#[derive(Clone, Default)]
pub struct MiddlewareChain {
    handlers: Arc<[Arc<dyn MiddlewareHandler>]>,
}

impl MiddlewareChain {
    pub fn new(handlers: Vec<Arc<dyn MiddlewareHandler>>) -> Self {
        Self {
            handlers: handlers.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs every handler in order, starting from the identity the validators resolved.
    pub async fn run(
        &self,
        request: &InboundRequest,
        ctx: &RequestContext,
        initial: Option<AuthInfo>,
    ) -> ChainResult {
        let mut identity = initial;

        for (index, handler) in self.handlers.iter().enumerate() {
            let scoped = ctx.clone().with_auth(identity.clone());
            let next = Next { index };
            let outcome = AssertUnwindSafe(handler.handle(request, &scoped, next))
                .catch_unwind()
                .await;

            match outcome {
                Ok(MiddlewareOutcome::Continue(proceed)) => {
                    debug_assert_eq!(proceed.index, index);
                    debug!(call_id = %ctx.call_id(), middleware = index, "middleware continued");
                    if let Some(resolved) = proceed.identity {
                        identity = Some(resolved);
                    }
                }
                Ok(MiddlewareOutcome::Respond(reply)) => {
                    debug!(
                        call_id = %ctx.call_id(),
                        middleware = index,
                        status = reply.status.as_u16(),
                        "middleware short-circuited"
                    );
                    return ChainResult::Respond(reply);
                }
                Ok(MiddlewareOutcome::Error(err)) => {
                    error!(call_id = %ctx.call_id(), middleware = index, error = %err, "middleware failed");
                    return ChainResult::Respond(
                        AppError::internal(format!("middleware {index} failed: {err}")).into_reply(),
                    );
                }
                Err(_) => {
                    error!(call_id = %ctx.call_id(), middleware = index, "middleware panicked");
                    return ChainResult::Respond(
                        AppError::internal(format!("middleware {index} panicked")).into_reply(),
                    );
                }
            }
        }

        ChainResult::Proceed(identity)
    }
}
