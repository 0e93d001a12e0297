//! The Upload State Machine (C3) and its per-session record.

use std::path::PathBuf;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::TransferError;
use crate::progress::ProgressThrottle;
use crate::staging;

/// Upload session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Active,
    Paused,
    Uploading,
    Completed,
    Stopped,
    Error,
}

struct SessionState {
    status: UploadStatus,
    bytes_received: u64,
    throttle: ProgressThrottle,
    /// Sanitized basename, used for the staging file name. Re-declared (and
    /// refreshed here) on every `start` for a known `file_id` — never the
    /// staging path itself, which stays put once a `.part` file exists.
    file_name: String,
    /// Original, unsanitized client-declared name — forwarded verbatim in
    /// the `X-File-Name` header. Refreshed alongside `file_name`.
    original_name: String,
    file_size: u64,
}

/// One in-progress upload. `bytes_received` and `status` live behind a
/// single async mutex: holding that guard across the staging-file append
/// *is* the session's write_lock — exactly one append can be in flight.
/// The declared `file_name`/`original_name`/`file_size` live there too,
/// since a `start` on an already-known `file_id` refreshes them in place
/// (SPEC_FULL.md §4.1) rather than leaving the session pinned to whatever
/// was declared when it was first created.
pub struct UploadSession {
    pub file_id: String,
    pub folder_id: Option<String>,
    pub user_id: String,
    pub user_token: String,
    pub temp_path: PathBuf,
    /// Opaque metadata-store handle, set once the insert succeeds.
    pub db_id: Mutex<Option<String>>,
    state: Mutex<SessionState>,
}

/// Outcome of applying an inbound `chunk` frame.
pub enum ChunkOutcome {
    /// Bytes were appended. `reached_end` means the transfer is now at
    /// `file_size` and the caller should invoke the Remote Forwarder.
    Appended {
        bytes_received: u64,
        emit_progress: bool,
        reached_end: bool,
    },
    /// The offset didn't match the session's authoritative cursor.
    OffsetMismatch { expected: u64 },
    /// The session is paused; chunks are rejected until `resume`.
    Paused,
}

impl UploadSession {
    pub fn new(
        file_id: String,
        original_name: String,
        sanitized_name: String,
        file_size: u64,
        folder_id: Option<String>,
        user_id: String,
        user_token: String,
        temp_path: PathBuf,
        bytes_received: u64,
    ) -> Self {
        Self {
            file_id,
            folder_id,
            user_id,
            user_token,
            temp_path,
            db_id: Mutex::new(None),
            state: Mutex::new(SessionState {
                status: UploadStatus::Active,
                bytes_received,
                throttle: ProgressThrottle::new(),
                file_name: sanitized_name,
                original_name,
                file_size,
            }),
        }
    }

    pub async fn status(&self) -> UploadStatus {
        self.state.lock().await.status
    }

    pub async fn bytes_received(&self) -> u64 {
        self.state.lock().await.bytes_received
    }

    pub async fn set_status(&self, status: UploadStatus) {
        self.state.lock().await.status = status;
    }

    pub async fn file_name(&self) -> String {
        self.state.lock().await.file_name.clone()
    }

    pub async fn original_name(&self) -> String {
        self.state.lock().await.original_name.clone()
    }

    pub async fn file_size(&self) -> u64 {
        self.state.lock().await.file_size
    }

    /// Refreshes the declared name/size on a `start` for an already-known
    /// `file_id`, per SPEC_FULL.md §4.1 — `user_id` and the staging path
    /// are untouched.
    pub async fn update_declared(&self, original_name: String, sanitized_name: String, file_size: u64) {
        let mut s = self.state.lock().await;
        s.original_name = original_name;
        s.file_name = sanitized_name;
        s.file_size = file_size;
    }

    pub async fn percent(&self, bytes_received: u64) -> f64 {
        let file_size = self.state.lock().await.file_size;
        if file_size == 0 {
            100.0
        } else {
            (bytes_received as f64 / file_size as f64) * 100.0
        }
    }

    /// Applies an inbound `pause` frame. Returns the offset to report.
    pub async fn pause(&self) -> u64 {
        let mut s = self.state.lock().await;
        s.status = UploadStatus::Paused;
        s.bytes_received
    }

    /// Applies an inbound `resume` frame. Returns the offset to report.
    pub async fn resume(&self) -> u64 {
        let mut s = self.state.lock().await;
        s.status = UploadStatus::Active;
        s.bytes_received
    }

    /// Applies an inbound `chunk` frame: offset check, append, throttle.
    ///
    /// Holding `self.state`'s lock across the `.part` file append is what
    /// guarantees exactly-one-append-in-flight (data model invariant 3).
    pub async fn apply_chunk(&self, offset: u64, data: &[u8]) -> Result<ChunkOutcome, TransferError> {
        let mut s = self.state.lock().await;

        if s.status == UploadStatus::Paused {
            return Ok(ChunkOutcome::Paused);
        }

        if offset != s.bytes_received {
            return Ok(ChunkOutcome::OffsetMismatch {
                expected: s.bytes_received,
            });
        }

        staging::append_bytes(&self.temp_path, data).await?;
        s.bytes_received += data.len() as u64;

        let reached_end = s.bytes_received >= s.file_size;
        let emit_progress = s.throttle.should_emit(Instant::now(), reached_end);
        if reached_end {
            s.status = UploadStatus::Uploading;
        }

        Ok(ChunkOutcome::Appended {
            bytes_received: s.bytes_received,
            emit_progress,
            reached_end,
        })
    }
}
