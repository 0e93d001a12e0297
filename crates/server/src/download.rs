//! The Download Engine (C6)'s HTTP fetch loop. The session bookkeeping
//! (`DownloadSession`/`DownloadSessionStore`) lives in `fileferry_transfer`;
//! this module owns the actual `reqwest` GET and the 64 KiB streaming read,
//! since only the server crate holds the shared HTTP client.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::TryStreamExt;
use reqwest::StatusCode;
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;

use fileferry_protocol::ServerEvent;
use fileferry_transfer::{self as transfer, DownloadSession, DownloadSessionStore, DownloadStatus};

use crate::connection::Sender;

/// Matches the client driver's default chunk size — there's no protocol
/// requirement they match, but it keeps the two halves of the relay
/// reading/writing in the same increments.
const READ_CHUNK_SIZE: usize = 65_536;

/// Fetches `session.url`, resuming from `session.downloaded_bytes()` via
/// `Range` if nonzero, and streams the body into the staging `.part` file
/// in [`READ_CHUNK_SIZE`] reads. Returns when the fetch completes, is
/// paused, is stopped, or fails — the caller decides whether to respawn
/// this function on `download-resume`.
pub async fn run(
    http: reqwest::Client,
    session: Arc<DownloadSession>,
    store: Arc<DownloadSessionStore>,
    sender: Sender,
    dest_dir: PathBuf,
) {
    session.set_status(DownloadStatus::Active).await;
    let downloaded = session.downloaded_bytes().await;

    let mut request = http.get(&session.url);
    if downloaded > 0 {
        request = request.header(reqwest::header::RANGE, format!("bytes={downloaded}-"));
    }

    let resp = match request.send().await {
        Ok(r) => r,
        Err(e) => {
            fail(&session, &sender, format!("transport error: {e}")).await;
            return;
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        fail(&session, &sender, format!("source responded {status}")).await;
        return;
    }

    let is_partial = resp.status() == StatusCode::PARTIAL_CONTENT;
    let content_length = resp.content_length().unwrap_or(0);
    let total_size = if is_partial { downloaded + content_length } else { content_length };
    session.set_total_size(total_size).await;
    sender.send_event(ServerEvent::DownloadInfo {
        session_id: session.session_id.clone(),
        total_size,
        filename: session.filename.clone(),
    });

    let byte_stream = resp
        .bytes_stream()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
    let mut reader = StreamReader::new(byte_stream);
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    loop {
        if session.status().await != DownloadStatus::Active {
            // Paused or stopped by a concurrent `download-pause`/`download-stop`
            // — the chunk boundary this check sits at is the engine's only
            // cooperative cancellation point (§4.6).
            break;
        }

        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = transfer::append_bytes(&session.temp_file_path, &buf[..n]).await {
                    fail(&session, &sender, format!("staging write failed: {e}")).await;
                    return;
                }
                let (downloaded_bytes, emit) = session.record_progress(n as u64, false).await;
                if emit {
                    let total = session.total_size().await;
                    let progress = if total == 0 {
                        0.0
                    } else {
                        (downloaded_bytes as f64 / total as f64) * 100.0
                    };
                    sender.send_event(ServerEvent::DownloadProgress {
                        session_id: session.session_id.clone(),
                        downloaded_bytes,
                        total_size: total,
                        progress,
                    });
                }
            }
            Err(e) => {
                fail(&session, &sender, format!("transport error: {e}")).await;
                return;
            }
        }
    }

    match session.status().await {
        DownloadStatus::Stopped => {
            // `download-stop`'s handler already deleted the partial file and
            // removed the session; nothing further to do here.
        }
        DownloadStatus::Paused => {
            // Partial file retained; `download-resume` re-invokes `run`.
        }
        _ => complete(&session, &store, &sender, &dest_dir).await,
    }
}

async fn fail(session: &DownloadSession, sender: &Sender, message: String) {
    tracing::warn!(session_id = %session.session_id, "download failed: {message}");
    session.set_status(DownloadStatus::Error).await;
    sender.send_event(ServerEvent::DownloadError {
        session_id: session.session_id.clone(),
        error: message,
    });
}

/// Finalizes a naturally-completed download: moves the `.part` file into
/// the staging directory under its de-duplicated final name and emits
/// `download-complete`.
async fn complete(session: &DownloadSession, store: &DownloadSessionStore, sender: &Sender, dest_dir: &Path) {
    let (downloaded_bytes, _) = session.record_progress(0, true).await;

    match finalize(session, dest_dir).await {
        Ok(final_path) => {
            session.set_status(DownloadStatus::Completed).await;
            sender.send_event(ServerEvent::DownloadComplete {
                session_id: session.session_id.clone(),
                file_path: final_path.to_string_lossy().into_owned(),
                total_size: downloaded_bytes,
            });
            store.remove(&session.session_id).await;
        }
        Err(e) => {
            fail(session, sender, format!("failed to finalize download: {e}")).await;
        }
    }
}

/// Renames the staging `.part` file to `session.filename` in `dest_dir`,
/// appending `_1`, `_2`, … before the extension if a file of that name
/// already exists.
async fn finalize(session: &DownloadSession, dest_dir: &Path) -> std::io::Result<PathBuf> {
    let stem = Path::new(&session.filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("download")
        .to_string();
    let ext = Path::new(&session.filename)
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| format!(".{s}"))
        .unwrap_or_default();

    let mut candidate = dest_dir.join(&session.filename);
    let mut n = 1u32;
    while tokio::fs::metadata(&candidate).await.is_ok() {
        candidate = dest_dir.join(format!("{stem}_{n}{ext}"));
        n += 1;
    }

    tokio::fs::rename(&session.temp_file_path, &candidate).await?;
    Ok(candidate)
}
