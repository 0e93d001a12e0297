//! Download session bookkeeping (C6's data half). The HTTP fetch loop
//! itself lives in the server crate, which owns the reqwest client; this
//! module only tracks the session's lifecycle and byte accounting — the
//! same pattern as [`crate::upload`], but not derived from a shared base,
//! per the design note that upload and download sessions share only the
//! store's indexing idea, by composition.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::progress::ProgressThrottle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Pending,
    Active,
    Paused,
    Completed,
    Stopped,
    Error,
}

struct DownloadState {
    status: DownloadStatus,
    downloaded_bytes: u64,
    total_size: u64,
    throttle: ProgressThrottle,
}

pub struct DownloadSession {
    pub session_id: String,
    pub url: String,
    pub filename: String,
    pub temp_file_path: PathBuf,
    state: Mutex<DownloadState>,
}

impl DownloadSession {
    pub fn new(session_id: String, url: String, filename: String, temp_file_path: PathBuf) -> Self {
        Self {
            session_id,
            url,
            filename,
            temp_file_path,
            state: Mutex::new(DownloadState {
                status: DownloadStatus::Pending,
                downloaded_bytes: 0,
                total_size: 0,
                throttle: ProgressThrottle::new(),
            }),
        }
    }

    pub async fn status(&self) -> DownloadStatus {
        self.state.lock().await.status
    }

    pub async fn set_status(&self, status: DownloadStatus) {
        self.state.lock().await.status = status;
    }

    pub async fn downloaded_bytes(&self) -> u64 {
        self.state.lock().await.downloaded_bytes
    }

    pub async fn total_size(&self) -> u64 {
        self.state.lock().await.total_size
    }

    pub async fn set_total_size(&self, total_size: u64) {
        self.state.lock().await.total_size = total_size;
    }

    /// Records that `n` more bytes were written, returning whether a
    /// progress event should be emitted for it (throttled to 250ms, always
    /// true when `force` — the final chunk of a completed download).
    pub async fn record_progress(&self, n: u64, force: bool) -> (u64, bool) {
        let mut s = self.state.lock().await;
        s.downloaded_bytes += n;
        let emit = s.throttle.should_emit(Instant::now(), force);
        (s.downloaded_bytes, emit)
    }

    /// Whether the download has reached its known total (or the source
    /// never reported one, in which case there's nothing left to compare
    /// against — EOF on the body is itself completion).
    pub async fn is_complete(&self) -> bool {
        let s = self.state.lock().await;
        s.total_size != 0 && s.downloaded_bytes >= s.total_size
    }
}

/// In-memory registry of download sessions, keyed by server-generated
/// `session_id`. Unlike uploads, downloads have no adoption-on-reconnect
/// concept — a dropped connection simply leaves the session paused-by-absence
/// in the store until a client re-issues `download-resume`.
pub struct DownloadSessionStore {
    staging_dir: PathBuf,
    sessions: Mutex<HashMap<String, Arc<DownloadSession>>>,
}

impl DownloadSessionStore {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub async fn create(&self, url: String, filename: String) -> Arc<DownloadSession> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let temp_file_path = self.staging_dir.join(format!("{session_id}.part"));
        let session = Arc::new(DownloadSession::new(
            session_id.clone(),
            url,
            filename,
            temp_file_path,
        ));
        self.sessions
            .lock()
            .await
            .insert(session_id, session.clone());
        session
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<DownloadSession>> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    pub async fn remove(&self, session_id: &str) -> Option<Arc<DownloadSession>> {
        self.sessions.lock().await.remove(session_id)
    }
}
