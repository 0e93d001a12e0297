//! WebSocket read pump — parses inbound frames and applies them to the
//! driver's shared state.

use futures_util::StreamExt;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use fileferry_protocol::ServerEvent;

use crate::driver::Inner;

/// Reads frames from the WebSocket and applies each parsed [`ServerEvent`]
/// to the shared driver state. Exits on cancellation, a transport error, or
/// stream end — whichever comes first.
pub(crate) async fn read_pump<S>(mut read: S, inner: std::sync::Arc<Inner>, cancel: CancellationToken)
where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => inner.handle_event(event).await,
                            Err(e) => warn!("failed to parse server event: {e}"),
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(_))) => break,
                    Some(Ok(_)) => {} // Binary/ping/pong frames carry no transfer semantics here.
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    inner.handle_disconnect().await;
}
