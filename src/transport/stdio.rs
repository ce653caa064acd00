//! Newline-delimited JSON-RPC over a pair of byte streams
//!
//! One protocol server serves the whole session. Each input line holds a message or a batch;
//! each reply is written as one line. There is no HTTP, CORS or authentication here: the peer
//! on the other end of the pipe is the process that started us.

use std::{io, sync::Arc};

use axum::http::HeaderMap;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use crate::{
    mcp::{message::Incoming, rpc::app_error_to_json_rpc, server::ServerFactory},
    transport::{context::RequestContext, correlator::dispatch},
};

pub async fn serve_stdio(factory: Arc<dyn ServerFactory>) -> io::Result<()> {
    serve(factory, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

/// Serves until `reader` reaches end of input.
pub async fn serve<R, W>(factory: Arc<dyn ServerFactory>, reader: R, mut writer: W) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let server = factory.create_server().await.map_err(io::Error::other)?;
    info!(instance = server.instance(), "stdio session started");

    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let ctx = RequestContext::new(HeaderMap::new());
        let output = match Incoming::parse(line.as_bytes()) {
            Ok(incoming) => {
                let mut replies = Vec::new();
                for message in incoming.messages {
                    if let Some(reply) = dispatch(Arc::clone(&server), message, ctx.clone()).await {
                        replies.push(reply.to_value());
                    }
                }
                match (incoming.batch, replies.len()) {
                    (_, 0) => None,
                    (true, _) => Some(Value::Array(replies)),
                    (false, _) => replies.pop(),
                }
            }
            Err(err) => {
                debug!(call_id = %ctx.call_id(), error = %err, "unparseable input line");
                Some(app_error_to_json_rpc(None, err).to_value())
            }
        };

        if let Some(output) = output {
            writer.write_all(output.to_string().as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
    }

    server.close();
    info!(instance = server.instance(), "stdio session ended");
    Ok(())
}
