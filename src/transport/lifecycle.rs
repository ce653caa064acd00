//! Per-call protocol server lifecycle
//!
//! Every call that reaches correlation gets a fresh `McpServer` and a fresh collector. Both are
//! torn down when the call ends, whether it flushed or was abandoned.

use std::sync::Arc;

use axum::http::StatusCode;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::{
    errors::AppError,
    mcp::{
        message::Incoming,
        server::{McpServer, ServerFactory},
    },
    transport::{
        context::RequestContext,
        correlator::{dispatch, Collector, StatelessCorrelator},
        reply::HttpReply,
    },
};

/// Closes the server when the call's last owner lets go of it.
struct Teardown {
    server: Arc<McpServer>,
    call_id: Arc<str>,
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.server.close();
        debug!(call_id = %self.call_id, instance = self.server.instance(), "call torn down");
    }
}

#[derive(Clone)]
pub struct StatelessTransport {
    factory: Arc<dyn ServerFactory>,
}

impl StatelessTransport {
    pub fn new(factory: Arc<dyn ServerFactory>) -> Self {
        Self { factory }
    }

    pub fn factory(&self) -> &Arc<dyn ServerFactory> {
        &self.factory
    }

    /// Runs one exchange: parse, pair a fresh server with a collector, wait for the flush.
    ///
    /// Cancelling `closed` aborts the collector. Notification-only bodies are answered with 202
    /// straight away and never create a collector.
    pub async fn handle_call(
        &self,
        ctx: RequestContext,
        body: &[u8],
        closed: CancellationToken,
    ) -> HttpReply {
        let incoming = match Incoming::parse(body) {
            Ok(incoming) => incoming,
            Err(err) => {
                debug!(call_id = %ctx.call_id(), error = %err, "rejecting unparseable body");
                return err.into_reply();
            }
        };

        let server = match self.factory.create_server().await {
            Ok(server) => server,
            Err(err) => return err.into_reply(),
        };
        let teardown = Teardown {
            server: Arc::clone(&server),
            call_id: Arc::from(ctx.call_id()),
        };

        let expected = incoming.expected_replies();
        if expected.is_empty() {
            debug!(
                call_id = %ctx.call_id(),
                notifications = incoming.messages.len(),
                "accepting notification-only call"
            );
            tokio::spawn(async move {
                let _teardown = teardown;
                for message in incoming.messages {
                    dispatch(Arc::clone(&server), message, ctx.clone()).await;
                }
            });
            return HttpReply::empty(StatusCode::ACCEPTED);
        }

        let (sink, reply) = oneshot::channel();
        let collector = Collector::new(expected, sink);
        let correlator = StatelessCorrelator::new(server, ctx);

        tokio::spawn(async move {
            let _teardown = teardown;
            correlator.run(incoming.messages, collector, closed).await;
        });

        match reply.await {
            Ok(reply) => reply,
            Err(_) => {
                error!("collector dropped without replying");
                AppError::internal("collector dropped without replying").into_reply()
            }
        }
    }
}
