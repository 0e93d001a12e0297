//! Session store, staging area, and upload/download state machines.
//!
//! This crate holds the pieces where correctness hinges on byte-accurate
//! offsets and concurrent resource discipline: C1 (Session Store), C2
//! (Staging Area), C3 (Upload State Machine), and the session half of C6
//! (Download Engine) — the engine's HTTP fetch loop lives in the server
//! crate, which owns the shared `reqwest::Client`.

mod download;
mod progress;
mod session_store;
mod staging;
mod upload;
mod validation;

pub use download::{DownloadSession, DownloadSessionStore, DownloadStatus};
pub use progress::{ProgressThrottle, THROTTLE_INTERVAL};
pub use session_store::{AuthContext, ConnectionRecord, SessionStore};
pub use staging::{append_bytes, delete_if_exists, existing_length, staging_path};
pub use upload::{ChunkOutcome, UploadSession, UploadStatus};
pub use validation::{sanitize_file_name, validate_upload_path};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("session {0} is owned by a different user")]
    OwnershipMismatch(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),
}
