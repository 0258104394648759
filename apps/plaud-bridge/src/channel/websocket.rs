use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use super::protocol::{decode_reply, EvaluateRequest, ExecutionResult};
use crate::error::{BridgeError, BridgeResult};

type DebuggerSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens a socket, runs one request/reply exchange, and closes the socket again.
pub async fn exchange(
    debugger_url: &str,
    request: &EvaluateRequest<'_>,
    socket_timeout: Duration,
) -> BridgeResult<ExecutionResult> {
    let mut socket = match timeout(socket_timeout, connect_async(debugger_url)).await {
        Ok(Ok((socket, _))) => socket,
        Ok(Err(err)) => {
            return Err(BridgeError::Transport(format!(
                "failed to connect to {debugger_url}: {err}"
            )))
        }
        Err(_) => {
            return Err(BridgeError::Transport(format!(
                "connecting to {debugger_url} timed out after {socket_timeout:?}"
            )))
        }
    };
    debug!(id = request.id, "debug channel connected");

    let outcome = send_and_await(&mut socket, request).await;

    if timeout(socket_timeout, socket.close(None)).await.is_err() {
        debug!(id = request.id, "debug channel close timed out");
    }
    outcome
}

async fn send_and_await(
    socket: &mut DebuggerSocket,
    request: &EvaluateRequest<'_>,
) -> BridgeResult<ExecutionResult> {
    let encoded = serde_json::to_string(request)
        .map_err(|err| BridgeError::Protocol(format!("failed to encode request: {err}")))?;
    socket
        .send(Message::Text(encoded))
        .await
        .map_err(|err| BridgeError::Transport(format!("failed to send request: {err}")))?;

    while let Some(msg) = socket.next().await {
        let message: Value = match msg {
            Ok(Message::Text(text)) => parse(text.as_bytes())?,
            Ok(Message::Binary(bytes)) => parse(&bytes)?,
            Ok(Message::Close(frame)) => {
                return Err(BridgeError::Transport(format!(
                    "debug channel closed before reply: {frame:?}"
                )))
            }
            Ok(_) => continue,
            Err(err) => {
                return Err(BridgeError::Transport(format!(
                    "debug channel read failed: {err}"
                )))
            }
        };
        match decode_reply(request.id, &message)? {
            Some(result) => return Ok(result),
            None => trace!(id = request.id, "skipping debugger event"),
        }
    }
    Err(BridgeError::Transport(
        "debug channel ended before reply".to_string(),
    ))
}

fn parse(bytes: &[u8]) -> BridgeResult<Value> {
    serde_json::from_slice(bytes)
        .map_err(|err| BridgeError::Protocol(format!("reply is not JSON: {err}")))
}
