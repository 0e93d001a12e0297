//! The staging area (C2): a single directory holding `.part` files keyed by
//! session id. The staging area, not any in-memory counter, is the
//! authoritative source of `bytes_received` across a crash or reconnect.

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Computes the staging path for a session: `<dir>/<file_id>_<name>.part`.
pub fn staging_path(dir: &Path, file_id: &str, sanitized_name: &str) -> PathBuf {
    dir.join(format!("{file_id}_{sanitized_name}.part"))
}

/// Returns the on-disk length of `path`, or `None` if it doesn't exist.
pub async fn existing_length(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|m| m.len())
}

/// Appends `data` to the staging file at `path`, creating it if necessary.
pub async fn append_bytes(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(data).await?;
    file.flush().await
}

/// Best-effort deletion; a missing file is not an error.
pub async fn delete_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
