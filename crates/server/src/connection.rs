//! Per-connection read/write pumps. Each accepted WebSocket becomes one
//! independently authenticated connection, multiplexing as many upload and
//! download sessions as the client opens, dispatched serially through the
//! Message Router (C7).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use fileferry_protocol::ServerEvent;

use crate::SEND_BUFFER_SIZE;
use crate::router::{self, Deps, RouterContext};

/// Keeps idle connections alive through intermediate proxies.
const PING_PERIOD: Duration = Duration::from_secs(30);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-unique id for a newly accepted connection.
pub fn next_connection_id() -> u64 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Handle for sending frames to one connected client. Cheap to clone —
/// wraps an `mpsc::Sender`.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<WsMessage>,
}

impl Sender {
    /// Sends a [`ServerEvent`] as JSON text. Silently drops the frame if
    /// the send buffer is full or the connection has already closed —
    /// there is no synchronous caller left to hand an error to.
    pub fn send_event(&self, event: ServerEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => {
                if self.tx.try_send(WsMessage::Text(json.into())).is_err() {
                    tracing::warn!("send buffer full or connection closed, dropping event");
                }
            }
            Err(e) => tracing::error!("failed to serialize event: {e}"),
        }
    }

    /// Sends an `error` event, optionally scoped to a `file_id`.
    pub fn send_error(&self, file_id: Option<String>, message: String) {
        self.send_event(ServerEvent::Error { file_id, error: message });
    }

    #[cfg(test)]
    pub(crate) fn for_test(tx: mpsc::Sender<WsMessage>) -> Self {
        Self { tx }
    }
}

/// Runs a single connection to completion: spawns the write pump, drives
/// the read pump inline (so that each frame is fully routed before the
/// next is read), then tears down both and pauses any sessions this
/// connection owned. Returns once the connection has fully closed.
pub async fn run_connection<S>(ws_stream: S, connection_id: u64, deps: Arc<Deps>, server_cancel: CancellationToken)
where
    S: Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
{
    deps.session_store.register_connection(connection_id).await;

    let (tx, rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let sender = Sender { tx };
    let cancel = server_cancel.child_token();

    let (sink, stream) = ws_stream.split();
    let write_handle = tokio::spawn(write_pump(sink, rx, cancel.clone()));

    let router_ctx = RouterContext {
        connection_id,
        sender,
        deps: deps.clone(),
        cancel: cancel.clone(),
    };
    read_pump(stream, router_ctx, cancel.clone()).await;

    cancel.cancel();
    let _ = write_handle.await;

    deps.session_store.on_disconnect(connection_id).await;
    tracing::info!(connection_id, "connection closed");
}

async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(ws_msg) => {
                        if let Err(e) = sink.send(ws_msg).await {
                            tracing::error!("write pump send error: {e}");
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    tracing::error!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}

async fn read_pump<S>(mut stream: S, router_ctx: RouterContext, cancel: CancellationToken)
where
    S: Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Send + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            frame = stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        router::handle_frame(&router_ctx, &text).await;
                        if router_ctx.cancel.is_cancelled() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) => break,
                    Some(Ok(_)) => {} // Binary/ping/pong frames carry no transfer semantics.
                    Some(Err(e)) => {
                        tracing::error!("read pump error: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_unique_and_increasing() {
        let a = next_connection_id();
        let b = next_connection_id();
        assert!(b > a);
    }
}
