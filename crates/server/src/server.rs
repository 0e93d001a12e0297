//! The relay server's listener: binds a TCP port, upgrades each connection
//! to WebSocket, and spawns one independent connection task per client —
//! unlike the single-slot Hub model this is adapted from, every
//! authenticated connection here runs concurrently with all the others.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;

use crate::ServerError;
use crate::connection;
use crate::router::Deps;

/// Largest message tolerated on the WebSocket, base64 inflation and JSON
/// framing included. `config::MAX_CHUNK_SIZE` (1 MiB) base64-encodes to
/// ~1.37 MiB; 4 MiB leaves comfortable headroom.
const WS_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind, e.g. `0.0.0.0:8080`.
    pub bind_addr: String,
}

/// The relay server: accepts WebSocket connections and hands each one off
/// to its own [`connection::run_connection`] task.
pub struct RelayServer {
    bind_addr: String,
    deps: Arc<Deps>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl RelayServer {
    pub fn new(config: ServerConfig, deps: Deps) -> Arc<Self> {
        Arc::new(Self {
            bind_addr: config.bind_addr,
            deps: Arc::new(deps),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    /// Returns the bound local address, once [`RelayServer::run`] has bound it.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port, or 0 if not yet bound.
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Signals every connection task and the accept loop to stop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Binds the listener and accepts connections until [`RelayServer::shutdown`].
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("relay server listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("server shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let deps = self.deps.clone();
                            let cancel = self.cancel.clone();
                            tokio::spawn(async move {
                                if let Err(e) = accept_and_run(stream, peer_addr, deps, cancel).await {
                                    tracing::error!(%peer_addr, "connection setup failed: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }
}

async fn accept_and_run(
    stream: tokio::net::TcpStream,
    peer_addr: SocketAddr,
    deps: Arc<Deps>,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
    ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
    let ws_stream = accept_async_with_config(stream, Some(ws_config)).await?;

    let connection_id = connection::next_connection_id();
    tracing::info!(connection_id, %peer_addr, "connection established");
    connection::run_connection(ws_stream, connection_id, deps, cancel).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthError, AuthStore};
    use crate::metadata::NullMetadataStore;
    use fileferry_protocol::{ClientAction, ServerEvent};
    use fileferry_transfer::{AuthContext, DownloadSessionStore, SessionStore};
    use futures_util::{SinkExt, StreamExt};

    struct AcceptAllAuth;

    #[async_trait::async_trait]
    impl AuthStore for AcceptAllAuth {
        async fn authenticate(&self, token: &str) -> Result<AuthContext, AuthError> {
            Ok(AuthContext {
                user_id: format!("user-{token}"),
                user_token: token.to_string(),
            })
        }
    }

    fn test_deps(staging_dir: &std::path::Path) -> Deps {
        Deps::new(
            Arc::new(SessionStore::new(staging_dir)),
            Arc::new(DownloadSessionStore::new(staging_dir)),
            Arc::new(AcceptAllAuth),
            Arc::new(NullMetadataStore),
            reqwest::Client::new(),
            "http://127.0.0.1:1/upload".to_string(),
        )
    }

    #[tokio::test]
    async fn accepts_multiple_concurrent_connections() {
        let dir = tempfile::tempdir().unwrap();
        let server = RelayServer::new(
            ServerConfig { bind_addr: "127.0.0.1:0".into() },
            test_deps(dir.path()),
        );
        let run_handle = tokio::spawn({
            let server = server.clone();
            async move { server.run().await }
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let port = server.port().await;
        let url = format!("ws://127.0.0.1:{port}");

        let (ws1, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let (ws2, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        drop(ws1);
        drop(ws2);

        server.shutdown();
        run_handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn authenticates_and_starts_an_upload() {
        let dir = tempfile::tempdir().unwrap();
        let server = RelayServer::new(
            ServerConfig { bind_addr: "127.0.0.1:0".into() },
            test_deps(dir.path()),
        );
        let run_handle = tokio::spawn({
            let server = server.clone();
            async move { server.run().await }
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let port = server.port().await;
        let url = format!("ws://127.0.0.1:{port}");

        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        let auth = serde_json::to_string(&ClientAction::Auth { token: "tok-1".into() }).unwrap();
        ws.send(tokio_tungstenite::tungstenite::Message::Text(auth.into()))
            .await
            .unwrap();

        let start = serde_json::to_string(&ClientAction::Start {
            file_id: "f1".into(),
            file_name: "a.bin".into(),
            file_size: 10,
            folder_id: None,
        })
        .unwrap();
        ws.send(tokio_tungstenite::tungstenite::Message::Text(start.into()))
            .await
            .unwrap();

        let reply = ws.next().await.unwrap().unwrap();
        let event: ServerEvent = match reply {
            tokio_tungstenite::tungstenite::Message::Text(t) => serde_json::from_str(&t).unwrap(),
            other => panic!("unexpected message: {other:?}"),
        };
        assert_eq!(event, ServerEvent::StartAck { file_id: "f1".into(), offset: 0 });

        drop(ws);
        server.shutdown();
        run_handle.await.unwrap().unwrap();
    }
}
