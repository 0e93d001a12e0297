//! The relay server: the Auth Gate (C4), Remote Forwarder (C5), Download
//! Engine (C6), and Message Router (C7) that sit between the
//! [`fileferry_client`](../fileferry_client/index.html) driver and the
//! session/staging primitives in `fileferry_transfer`.

mod auth;
mod config;
mod connection;
mod download;
mod forwarder;
mod metadata;
mod router;
mod server;

pub use auth::{AuthError, AuthStore, HttpAuthStore};
pub use config::{Config, HTTP_CONNECT_TIMEOUT, HTTP_TOTAL_TIMEOUT};
pub use connection::Sender;
pub use forwarder::{ForwardOutcome, forward};
pub use metadata::{MetadataError, MetadataStore, NullMetadataStore};
pub use router::Deps;
pub use server::{RelayServer, ServerConfig};

/// Per-connection outbound send-buffer capacity. A chunked upload emits at
/// most one `progress` per 250ms plus the occasional ack, so this is
/// generous headroom against `try_send` dropping frames under load.
pub const SEND_BUFFER_SIZE: usize = 256;

/// Errors produced by the relay server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}
