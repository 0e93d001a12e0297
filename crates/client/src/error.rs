//! Errors produced by the client driver.

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed before a reply arrived")]
    ConnectionClosed,

    #[error("server rejected the request: {0}")]
    Rejected(String),

    #[error("no active session — call start() first")]
    NoSession,

    #[error("session was stopped")]
    Stopped,
}
