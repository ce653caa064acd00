//! Stateless request/response correlation
//!
//! A `Collector` owns the response sink of one HTTP call and the set of request ids that are
//! still owed a reply. Replies may resolve in any order. Once nothing is pending the collected
//! replies are flushed: a single reply as a bare object, several as an array. If the call is
//! abandoned first, the collector aborts instead and writes a 503 to the sink if it is still
//! open. A collector writes to its sink at most once.

use std::{collections::HashMap, panic::AssertUnwindSafe, sync::Arc};

use axum::http::StatusCode;
use futures::FutureExt;
use serde_json::Value;
use tokio::{sync::oneshot, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{
    errors::AppError,
    mcp::{
        message::{ErrorCode, Message, RequestId},
        rpc::json_rpc_error,
        server::McpServer,
    },
    transport::{context::RequestContext, reply::HttpReply},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Collecting,
    Flushed,
    Aborted,
}

#[derive(Debug)]
pub struct Collector {
    /// Expected ids with their multiplicity; a batch may repeat an id.
    pending: HashMap<Option<RequestId>, usize>,
    outstanding: usize,
    responses: Vec<Message>,
    sink: Option<oneshot::Sender<HttpReply>>,
    state: CollectorState,
}

impl Collector {
    pub fn new(expected: Vec<Option<RequestId>>, sink: oneshot::Sender<HttpReply>) -> Self {
        let outstanding = expected.len();
        let mut pending = HashMap::with_capacity(outstanding);
        for id in expected {
            *pending.entry(id).or_insert(0) += 1;
        }

        Self {
            pending,
            outstanding,
            responses: Vec::with_capacity(outstanding),
            sink: Some(sink),
            state: CollectorState::Collecting,
        }
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Records one reply. Flushes once nothing is pending. Returns whether the reply was taken.
    pub fn resolve(&mut self, response: Message) -> bool {
        if self.state != CollectorState::Collecting {
            debug!(state = ?self.state, "dropping reply for finished collector");
            return false;
        }

        let Some(remaining) = self.pending.get_mut(&response.id) else {
            warn!(id = ?response.id, "dropping reply for an id this call did not send");
            return false;
        };
        *remaining -= 1;
        if *remaining == 0 {
            self.pending.remove(&response.id);
        }
        self.outstanding -= 1;
        self.responses.push(response);

        if self.outstanding == 0 {
            self.flush();
        }
        true
    }

    /// Answers every id still pending with an internal error, which flushes the collector.
    pub fn fail_pending(&mut self) {
        if self.state != CollectorState::Collecting {
            return;
        }

        let missing = self
            .pending
            .drain()
            .flat_map(|(id, count)| std::iter::repeat(id).take(count))
            .collect::<Vec<_>>();
        for id in missing {
            error!(id = ?id, "request finished without a reply");
            self.outstanding -= 1;
            self.responses
                .push(json_rpc_error(id, ErrorCode::InternalError, "Internal error"));
        }
        self.flush();
    }

    /// Abandons the call. An open sink receives a 503 and later replies are discarded.
    pub fn abort(&mut self) {
        if self.state != CollectorState::Collecting {
            return;
        }

        self.state = CollectorState::Aborted;
        debug!(outstanding = self.outstanding, "collector aborted");
        self.pending.clear();
        self.responses.clear();
        self.outstanding = 0;

        if let Some(sink) = self.sink.take() {
            let reply = AppError::ServiceUnavailable {
                message: "shutting down",
            }
            .into_reply();
            if sink.send(reply).is_err() {
                debug!("connection already gone, abort reply not delivered");
            }
        }
    }

    fn flush(&mut self) {
        self.state = CollectorState::Flushed;

        let mut responses = std::mem::take(&mut self.responses);
        let body = if responses.len() == 1 {
            responses.remove(0).to_value()
        } else {
            Value::Array(responses.iter().map(Message::to_value).collect())
        };

        if let Some(sink) = self.sink.take() {
            if sink.send(HttpReply::json(StatusCode::OK, body)).is_err() {
                debug!("connection gone before flush");
            }
        }
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Dispatches one call's messages into its protocol server and feeds replies to a collector.
pub struct StatelessCorrelator {
    server: Arc<McpServer>,
    ctx: RequestContext,
}

impl StatelessCorrelator {
    pub fn new(server: Arc<McpServer>, ctx: RequestContext) -> Self {
        Self { server, ctx }
    }

    /// Runs until the collector flushes or `closed` fires, whichever comes first.
    pub async fn run(
        &self,
        messages: Vec<Message>,
        mut collector: Collector,
        closed: CancellationToken,
    ) -> CollectorState {
        let mut tasks = JoinSet::new();
        for message in messages {
            tasks.spawn(dispatch(
                Arc::clone(&self.server),
                message,
                self.ctx.clone(),
            ));
        }

        while collector.state() == CollectorState::Collecting {
            tokio::select! {
                biased;
                _ = closed.cancelled() => {
                    warn!(call_id = %self.ctx.call_id(), "connection closed with replies outstanding");
                    collector.abort();
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok(Some(response))) => {
                        collector.resolve(response);
                    }
                    Some(Ok(None)) => {}
                    Some(Err(err)) => {
                        error!(call_id = %self.ctx.call_id(), error = %err, "dispatch task failed");
                    }
                    None => collector.fail_pending(),
                },
            }
        }

        // Handlers still running past the flush or abort finish on their own.
        tasks.detach_all();
        collector.state()
    }
}

/// Runs one message through the server. A panicking handler yields an internal error for
/// that id only.
pub async fn dispatch(
    server: Arc<McpServer>,
    message: Message,
    ctx: RequestContext,
) -> Option<Message> {
    let id = message.id.clone();
    let expects_reply = message.expects_reply();

    match AssertUnwindSafe(server.handle_message(message, &ctx))
        .catch_unwind()
        .await
    {
        Ok(reply) => reply,
        Err(_) => {
            error!(call_id = %ctx.call_id(), id = ?id, "handler panicked");
            expects_reply.then(|| json_rpc_error(id, ErrorCode::InternalError, "Internal error"))
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderMap;
    use serde_json::json;

    use super::*;
    use crate::domain;

    fn reply(id: i64) -> Message {
        Message::result(Some(RequestId::Number(id)), json!({ "n": id }))
    }

    #[test]
    fn single_reply_flushes_as_bare_object() {
        let (sink, mut rx) = oneshot::channel();
        let mut collector = Collector::new(vec![Some(RequestId::Number(1))], sink);

        assert!(collector.resolve(reply(1)));

        let body = rx.try_recv().expect("flushed").body.unwrap();
        assert_eq!(collector.state(), CollectorState::Flushed);
        assert_eq!(body["id"], 1);
        assert!(body.is_object());
    }

    #[test]
    fn tolerates_out_of_order_replies() {
        let (sink, mut rx) = oneshot::channel();
        let mut collector = Collector::new(
            vec![
                Some(RequestId::Number(1)),
                Some(RequestId::Number(2)),
                Some(RequestId::Number(3)),
            ],
            sink,
        );

        collector.resolve(reply(3));
        collector.resolve(reply(1));
        assert_eq!(collector.state(), CollectorState::Collecting);
        assert!(rx.try_recv().is_err());
        collector.resolve(reply(2));

        let body = rx.try_recv().expect("flushed").body.unwrap();
        let mut ids = body
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["id"].as_i64().unwrap())
            .collect::<Vec<_>>();
        ids.sort();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn duplicate_ids_are_counted() {
        let (sink, mut rx) = oneshot::channel();
        let mut collector = Collector::new(
            vec![Some(RequestId::Number(7)), Some(RequestId::Number(7))],
            sink,
        );

        collector.resolve(reply(7));
        assert_eq!(collector.outstanding(), 1);
        collector.resolve(reply(7));

        let body = rx.try_recv().expect("flushed").body.unwrap();
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[test]
    fn ignores_unknown_and_late_replies() {
        let (sink, mut rx) = oneshot::channel();
        let mut collector = Collector::new(vec![Some(RequestId::Number(1))], sink);

        assert!(!collector.resolve(reply(99)));
        assert!(collector.resolve(reply(1)));
        assert!(!collector.resolve(reply(1)));

        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn abort_writes_service_unavailable_once() {
        let (sink, mut rx) = oneshot::channel();
        let mut collector = Collector::new(vec![Some(RequestId::Number(1))], sink);

        collector.abort();
        collector.abort();
        assert!(!collector.resolve(reply(1)));

        let reply = rx.try_recv().expect("abort reply");
        assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(reply.body.unwrap()["error"]["code"], -32000);
        assert_eq!(collector.state(), CollectorState::Aborted);
    }

    #[test]
    fn fail_pending_answers_missing_ids() {
        let (sink, mut rx) = oneshot::channel();
        let mut collector = Collector::new(
            vec![Some(RequestId::Number(1)), Some(RequestId::Number(2))],
            sink,
        );

        collector.resolve(reply(1));
        collector.fail_pending();

        let body = rx.try_recv().expect("flushed").body.unwrap();
        let items = body.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1]["id"], 2);
        assert_eq!(items[1]["error"]["code"], -32603);
    }

    #[tokio::test]
    async fn correlator_collects_batch_and_skips_notifications() {
        let server = Arc::new(McpServer::new(Arc::new(domain::default_registry())));
        let correlator =
            StatelessCorrelator::new(server, RequestContext::new(HeaderMap::new()));
        let messages = vec![
            Message::request(RequestId::Number(1), "ping", None),
            Message::notification("notifications/initialized", None),
            Message::request(RequestId::Number(2), "tools/list", None),
        ];
        let (sink, rx) = oneshot::channel();
        let collector = Collector::new(
            vec![Some(RequestId::Number(1)), Some(RequestId::Number(2))],
            sink,
        );

        let state = correlator
            .run(messages, collector, CancellationToken::new())
            .await;

        let body = rx.await.expect("reply").body.unwrap();
        assert_eq!(state, CollectorState::Flushed);
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cancelled_call_aborts() {
        let server = Arc::new(McpServer::new(Arc::new(domain::default_registry())));
        let correlator =
            StatelessCorrelator::new(server, RequestContext::new(HeaderMap::new()));
        let (sink, rx) = oneshot::channel();
        let collector = Collector::new(vec![Some(RequestId::Number(1))], sink);
        let closed = CancellationToken::new();
        closed.cancel();

        let state = correlator
            .run(vec![Message::request(RequestId::Number(1), "ping", None)], collector, closed)
            .await;

        assert_eq!(state, CollectorState::Aborted);
        assert_eq!(rx.await.unwrap().status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
