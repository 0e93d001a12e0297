//! The Message Router (C7): parses each inbound frame as a [`ClientAction`]
//! and dispatches to the Upload State Machine (C3), the Auth Gate (C4), or
//! the Download Engine (C6). Single-threaded per connection — [`handle_frame`]
//! is awaited to completion before the connection's read pump reads the next
//! frame, which pins the per-connection ordering contract (§5).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;

use fileferry_protocol::{ClientAction, ServerEvent};
use fileferry_transfer::{AuthContext, ChunkOutcome, DownloadSessionStore, SessionStore, UploadStatus};

use crate::auth::AuthStore;
use crate::connection::Sender;
use crate::download;
use crate::forwarder::{self, ForwardOutcome};
use crate::metadata::MetadataStore;

/// Bound on the completed-upload cache below — large enough to absorb a
/// burst of `complete` frames racing their own `complete-ack`, small enough
/// to never matter for memory.
const COMPLETION_CACHE_CAP: usize = 256;

/// Dependencies shared by every connection, built once at startup and
/// handed to each connection's router context as an `Arc`.
pub struct Deps {
    pub session_store: Arc<SessionStore>,
    pub download_store: Arc<DownloadSessionStore>,
    pub auth_store: Arc<dyn AuthStore>,
    pub metadata_store: Arc<dyn MetadataStore>,
    pub http: reqwest::Client,
    pub remote_upload_url: String,
    completions: CompletionCache,
}

impl Deps {
    pub fn new(
        session_store: Arc<SessionStore>,
        download_store: Arc<DownloadSessionStore>,
        auth_store: Arc<dyn AuthStore>,
        metadata_store: Arc<dyn MetadataStore>,
        http: reqwest::Client,
        remote_upload_url: String,
    ) -> Self {
        Self {
            session_store,
            download_store,
            auth_store,
            metadata_store,
            http,
            remote_upload_url,
            completions: CompletionCache::new(),
        }
    }
}

/// Recently-completed-upload lookup: `complete-ack` is emitted as soon as
/// the final chunk's forward succeeds, not when the client's own `complete`
/// frame arrives — by the time that frame shows up the session has usually
/// already been removed from the [`SessionStore`]. This cache lets the
/// router answer "already satisfied" instead of misreporting `SessionGone`.
struct CompletionCache {
    entries: Mutex<(HashMap<String, String>, VecDeque<String>)>,
}

impl CompletionCache {
    fn new() -> Self {
        Self {
            entries: Mutex::new((HashMap::new(), VecDeque::new())),
        }
    }

    async fn insert(&self, file_id: String, file_path: String) {
        let mut guard = self.entries.lock().await;
        let (map, order) = &mut *guard;
        if map.insert(file_id.clone(), file_path).is_none() {
            order.push_back(file_id);
            if order.len() > COMPLETION_CACHE_CAP
                && let Some(oldest) = order.pop_front()
            {
                map.remove(&oldest);
            }
        }
    }

    async fn get(&self, file_id: &str) -> Option<String> {
        self.entries.lock().await.0.get(file_id).cloned()
    }
}

/// Per-connection routing context: the connection's identity plus a shared
/// handle on [`Deps`].
pub struct RouterContext {
    pub connection_id: u64,
    pub sender: Sender,
    pub deps: Arc<Deps>,
    pub cancel: tokio_util::sync::CancellationToken,
}

/// Parses and dispatches one inbound text frame. Malformed frames and
/// unrecognized actions are logged and dropped — the connection stays open
/// (`ClientProtocolError`, §7).
pub async fn handle_frame(ctx: &RouterContext, text: &str) {
    let action: ClientAction = match serde_json::from_str(text) {
        Ok(a) => a,
        Err(e) => {
            tracing::warn!(connection_id = ctx.connection_id, "malformed frame: {e}");
            return;
        }
    };

    if !matches!(action, ClientAction::Auth { .. })
        && ctx
            .deps
            .session_store
            .connection_auth(ctx.connection_id)
            .await
            .is_none()
    {
        ctx.sender
            .send_error(None, "authentication required".to_string());
        return;
    }

    match action {
        ClientAction::Auth { token } => handle_auth(ctx, token).await,
        ClientAction::Start {
            file_id,
            file_name,
            file_size,
            folder_id,
        } => handle_start(ctx, file_id, file_name, file_size, folder_id).await,
        ClientAction::Chunk { file_id, offset, data } => handle_chunk(ctx, file_id, offset, data).await,
        ClientAction::Pause { file_id } => handle_pause(ctx, file_id).await,
        ClientAction::Resume { file_id } => handle_resume(ctx, file_id).await,
        ClientAction::Stop { file_id } => handle_stop(ctx, file_id).await,
        ClientAction::Complete { file_id } => handle_complete(ctx, file_id).await,
        ClientAction::DownloadStart { url, filename } => handle_download_start(ctx, url, filename).await,
        ClientAction::DownloadPause { session_id } => handle_download_pause(ctx, session_id).await,
        ClientAction::DownloadResume { session_id } => handle_download_resume(ctx, session_id).await,
        ClientAction::DownloadStop { session_id } => handle_download_stop(ctx, session_id).await,
    }
}

async fn handle_auth(ctx: &RouterContext, token: String) {
    match ctx.deps.auth_store.authenticate(&token).await {
        Ok(auth) => {
            ctx.deps
                .session_store
                .authenticate_connection(ctx.connection_id, auth)
                .await;
            tracing::info!(connection_id = ctx.connection_id, "connection authenticated");
        }
        Err(e) => {
            tracing::warn!(connection_id = ctx.connection_id, "authentication failed: {e}");
            ctx.sender.send_error(None, "authentication failed".to_string());
            ctx.cancel.cancel();
        }
    }
}

async fn current_auth(ctx: &RouterContext) -> Option<AuthContext> {
    ctx.deps.session_store.connection_auth(ctx.connection_id).await
}

async fn handle_start(
    ctx: &RouterContext,
    file_id: String,
    file_name: String,
    file_size: u64,
    folder_id: Option<String>,
) {
    let Some(auth) = current_auth(ctx).await else {
        ctx.sender.send_error(Some(file_id), "authentication required".to_string());
        return;
    };

    let is_new = ctx.deps.session_store.get(&file_id).await.is_none();

    let session = match ctx
        .deps
        .session_store
        .get_or_create(ctx.connection_id, &file_id, &file_name, file_size, folder_id, &auth)
        .await
    {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(file_id, "start rejected: {e}");
            ctx.sender.send_error(Some(file_id), e.to_string());
            return;
        }
    };

    if is_new {
        match ctx
            .deps
            .metadata_store
            .insert(&file_id, &auth.user_id, "uploading")
            .await
        {
            Ok(db_id) => *session.db_id.lock().await = Some(db_id),
            Err(e) => tracing::warn!(file_id, "metadata insert failed (non-fatal): {e}"),
        }
    }

    let offset = session.bytes_received().await;
    ctx.sender.send_event(ServerEvent::StartAck {
        file_id: file_id.clone(),
        offset,
    });

    // A prior forward attempt failed after the client had already streamed
    // every byte — no further `chunk` will ever arrive to re-trigger it, so
    // a fresh `start` on the same file_id is the retry signal (§4.5, §9:
    // retry re-streams the full staging file rather than resuming a
    // partial remote upload).
    if !is_new && session.status().await == UploadStatus::Error && offset >= session.file_size().await {
        finish_upload(ctx, file_id, session).await;
    }
}

async fn handle_chunk(ctx: &RouterContext, file_id: String, offset: u64, data: Vec<u8>) {
    let Some(session) = ctx.deps.session_store.get(&file_id).await else {
        ctx.sender.send_error(Some(file_id), "session not found".to_string());
        return;
    };

    let outcome = match session.apply_chunk(offset, &data).await {
        Ok(o) => o,
        Err(e) => {
            tracing::error!(file_id, "staging write failed: {e}");
            session.set_status(UploadStatus::Error).await;
            ctx.sender.send_error(Some(file_id), e.to_string());
            return;
        }
    };

    match outcome {
        ChunkOutcome::Paused => {
            ctx.sender.send_error(Some(file_id), "session paused".to_string());
        }
        ChunkOutcome::OffsetMismatch { expected } => {
            ctx.sender
                .send_event(ServerEvent::OffsetMismatch { file_id, expected });
        }
        ChunkOutcome::Appended {
            bytes_received,
            emit_progress,
            reached_end,
        } => {
            if emit_progress {
                ctx.sender.send_event(ServerEvent::Progress {
                    file_id: file_id.clone(),
                    offset: bytes_received,
                    percent: session.percent(bytes_received).await,
                });
            }
            if reached_end {
                finish_upload(ctx, file_id, session).await;
            }
        }
    }
}

/// Runs the Remote Forwarder (C5) once a session's byte count reaches
/// `file_size`, then applies the response policy from §4.5.
async fn finish_upload(ctx: &RouterContext, file_id: String, session: Arc<fileferry_transfer::UploadSession>) {
    match forwarder::forward(&ctx.deps.http, &ctx.deps.remote_upload_url, &session).await {
        ForwardOutcome::Success { file_path } => {
            session.set_status(UploadStatus::Completed).await;
            let _ = fileferry_transfer::delete_if_exists(&session.temp_path).await;
            if let Some(db_id) = session.db_id.lock().await.clone() {
                let _ = ctx.deps.metadata_store.update_status(&db_id, "completed").await;
            }
            ctx.deps.completions.insert(file_id.clone(), file_path.clone()).await;
            ctx.deps.session_store.remove(&file_id).await;
            ctx.sender
                .send_event(ServerEvent::CompleteAck { file_id, file_path });
        }
        ForwardOutcome::Failed { message } => {
            tracing::warn!(file_id, "forward failed, staging retained: {message}");
            session.set_status(UploadStatus::Error).await;
            if let Some(db_id) = session.db_id.lock().await.clone() {
                let _ = ctx.deps.metadata_store.update_status(&db_id, "error").await;
            }
            ctx.sender.send_error(Some(file_id), message);
        }
    }
}

async fn handle_pause(ctx: &RouterContext, file_id: String) {
    let Some(session) = ctx.deps.session_store.get(&file_id).await else {
        ctx.sender.send_error(Some(file_id), "session not found".to_string());
        return;
    };
    let offset = session.pause().await;
    ctx.sender.send_event(ServerEvent::PauseAck { file_id, offset });
}

async fn handle_resume(ctx: &RouterContext, file_id: String) {
    let Some(session) = ctx.deps.session_store.get(&file_id).await else {
        ctx.sender.send_error(Some(file_id), "session not found".to_string());
        return;
    };
    let offset = session.resume().await;
    ctx.sender.send_event(ServerEvent::ResumeAck { file_id, offset });
}

async fn handle_stop(ctx: &RouterContext, file_id: String) {
    let Some(session) = ctx.deps.session_store.remove(&file_id).await else {
        ctx.sender.send_error(Some(file_id), "session not found".to_string());
        return;
    };
    let _ = fileferry_transfer::delete_if_exists(&session.temp_path).await;
    if let Some(db_id) = session.db_id.lock().await.clone() {
        let _ = ctx.deps.metadata_store.update_status(&db_id, "stopped").await;
    }
    ctx.sender.send_event(ServerEvent::StopAck { file_id });
}

async fn handle_complete(ctx: &RouterContext, file_id: String) {
    if let Some(file_path) = ctx.deps.completions.get(&file_id).await {
        ctx.sender
            .send_event(ServerEvent::CompleteAck { file_id, file_path });
        return;
    }

    match ctx.deps.session_store.get(&file_id).await {
        // Forwarding is already in flight (or about to be) from the chunk
        // that reached `file_size` — its own `complete-ack`/`error` is on
        // the way. Nothing to do here but wait for it.
        Some(session) if session.status().await == UploadStatus::Uploading => {}
        Some(_) => {
            ctx.sender
                .send_error(Some(file_id), "transfer not yet complete".to_string());
        }
        None => {
            ctx.sender.send_error(Some(file_id), "session not found".to_string());
        }
    }
}

async fn handle_download_start(ctx: &RouterContext, url: String, filename: Option<String>) {
    let filename = filename.unwrap_or_else(|| infer_filename(&url));
    let session = ctx.deps.download_store.create(url, filename).await;
    ctx.sender.send_event(ServerEvent::DownloadStartAck {
        session_id: session.session_id.clone(),
    });

    let http = ctx.deps.http.clone();
    let store = ctx.deps.download_store.clone();
    let sender = ctx.sender.clone();
    let dest_dir = store.staging_dir().to_path_buf();
    tokio::spawn(download::run(http, session, store, sender, dest_dir));
}

fn infer_filename(url: &str) -> String {
    url.rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("download")
        .to_string()
}

async fn handle_download_pause(ctx: &RouterContext, session_id: String) {
    if let Some(session) = ctx.deps.download_store.get(&session_id).await {
        session.set_status(fileferry_transfer::DownloadStatus::Paused).await;
    }
}

async fn handle_download_resume(ctx: &RouterContext, session_id: String) {
    let Some(session) = ctx.deps.download_store.get(&session_id).await else {
        ctx.sender.send_event(ServerEvent::DownloadError {
            session_id,
            error: "session not found".to_string(),
        });
        return;
    };

    // Only a paused session may be resumed — otherwise a second
    // download-resume (or one racing an already-running fetch) would spawn
    // a second `download::run` against the same `.part` file.
    if session.status().await != fileferry_transfer::DownloadStatus::Paused {
        return;
    }

    let http = ctx.deps.http.clone();
    let store = ctx.deps.download_store.clone();
    let sender = ctx.sender.clone();
    let dest_dir = store.staging_dir().to_path_buf();
    tokio::spawn(download::run(http, session, store, sender, dest_dir));
}

async fn handle_download_stop(ctx: &RouterContext, session_id: String) {
    let Some(session) = ctx.deps.download_store.remove(&session_id).await else {
        return;
    };
    session.set_status(fileferry_transfer::DownloadStatus::Stopped).await;
    let _ = fileferry_transfer::delete_if_exists(&session.temp_file_path).await;
}
