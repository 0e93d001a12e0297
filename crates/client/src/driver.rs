//! The Client Driver (C8): opens the connection, streams a local file as
//! sequential chunks, and reconciles with the server's authoritative offset.
//!
//! The driver is an explicit `open`/`close` resource rather than a
//! coroutine-style context manager: `open()` establishes the connection and
//! spawns the background receive task, `close()` cancels and joins it. Both
//! success and error exit paths route through `close()` so no task outlives
//! the handle.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{Mutex, Notify, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

use fileferry_protocol::{ClientAction, ServerEvent};

use crate::ClientError;
use crate::pumps::{read::read_pump, write::write_pump};

/// Default chunk size, matching the server's documented default.
pub const DEFAULT_CHUNK_SIZE: u64 = 65_536;

/// A reply the driver is waiting on, fulfilled by the matching server
/// event (or failed by an `error` event that arrives while it's pending).
enum PendingReply {
    Start(oneshot::Sender<Result<u64, String>>),
    Pause(oneshot::Sender<Result<u64, String>>),
    Resume(oneshot::Sender<Result<u64, String>>),
    Stop(oneshot::Sender<Result<(), String>>),
}

/// State shared between the public driver handle and the background read
/// pump. The read pump is the only writer of `offset` past the upload
/// loop's own optimistic increments — both sides agree because the server
/// is the single source of truth for any value it reports.
pub(crate) struct Inner {
    offset: AtomicU64,
    file_size: AtomicU64,
    stopped: AtomicBool,
    run_gate: RunGate,
    pending: Mutex<Option<PendingReply>>,
    /// `complete-ack`/forward-failure outcome, landed here regardless of
    /// whether `complete()` is already waiting — the server may emit
    /// `complete-ack` as soon as the final chunk's forward succeeds,
    /// before the client gets around to sending its own `complete` frame.
    /// A `watch` channel (rather than a `Notify` + `Mutex`) sidesteps the
    /// lost-wakeup race between checking the current value and awaiting
    /// the next change: only the read pump ever writes it, so there's no
    /// write contention to guard against either.
    complete_tx: watch::Sender<Option<Result<String, String>>>,
}

impl Inner {
    pub(crate) async fn handle_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::StartAck { offset, .. } => {
                self.offset.store(offset, Ordering::SeqCst);
                self.fulfill_start(Ok(offset)).await;
            }
            ServerEvent::Progress { offset, .. } => {
                self.offset.store(offset, Ordering::SeqCst);
            }
            ServerEvent::OffsetMismatch { expected, .. } => {
                self.offset.store(expected, Ordering::SeqCst);
            }
            ServerEvent::PauseAck { offset, .. } => {
                self.offset.store(offset, Ordering::SeqCst);
                self.fulfill_pause(Ok(offset)).await;
            }
            ServerEvent::ResumeAck { offset, .. } => {
                self.offset.store(offset, Ordering::SeqCst);
                self.fulfill_resume(Ok(offset)).await;
            }
            ServerEvent::StopAck { .. } => {
                self.stopped.store(true, Ordering::SeqCst);
                self.fulfill_stop(Ok(())).await;
            }
            ServerEvent::CompleteAck { file_path, .. } => {
                self.set_complete_result(Ok(file_path));
            }
            ServerEvent::Error { error, .. } => {
                if !self.fail_pending(error.clone()).await {
                    // Unclaimed — most likely a forward failure delivered
                    // ahead of the client's own `complete()` call.
                    self.set_complete_result(Err(error));
                }
            }
            ServerEvent::DownloadStartAck { .. }
            | ServerEvent::DownloadInfo { .. }
            | ServerEvent::DownloadProgress { .. }
            | ServerEvent::DownloadComplete { .. }
            | ServerEvent::DownloadError { .. } => {
                tracing::debug!("download event ignored by upload driver");
            }
        }
    }

    pub(crate) async fn handle_disconnect(&self) {
        self.fail_pending("connection closed".to_string()).await;
    }

    async fn take_pending(&self) -> Option<PendingReply> {
        self.pending.lock().await.take()
    }

    async fn fulfill_start(&self, result: Result<u64, String>) {
        if let Some(PendingReply::Start(tx)) = self.take_pending().await {
            let _ = tx.send(result);
        }
    }

    async fn fulfill_pause(&self, result: Result<u64, String>) {
        if let Some(PendingReply::Pause(tx)) = self.take_pending().await {
            let _ = tx.send(result);
        }
    }

    async fn fulfill_resume(&self, result: Result<u64, String>) {
        if let Some(PendingReply::Resume(tx)) = self.take_pending().await {
            let _ = tx.send(result);
        }
    }

    async fn fulfill_stop(&self, result: Result<(), String>) {
        if let Some(PendingReply::Stop(tx)) = self.take_pending().await {
            let _ = tx.send(result);
        }
    }

    /// Records a `complete`/forward outcome and wakes anyone blocked in
    /// `complete()`. Returns `true` if something was actually pending.
    async fn fail_pending(&self, message: String) -> bool {
        match self.take_pending().await {
            Some(PendingReply::Start(tx)) => {
                let _ = tx.send(Err(message));
                true
            }
            Some(PendingReply::Pause(tx)) => {
                let _ = tx.send(Err(message));
                true
            }
            Some(PendingReply::Resume(tx)) => {
                let _ = tx.send(Err(message));
                true
            }
            Some(PendingReply::Stop(tx)) => {
                let _ = tx.send(Err(message));
                true
            }
            None => false,
        }
    }

    fn set_complete_result(&self, result: Result<String, String>) {
        if self.complete_tx.borrow().is_none() {
            let _ = self.complete_tx.send(Some(result));
        }
    }

    fn complete_rx(&self) -> watch::Receiver<Option<Result<String, String>>> {
        self.complete_tx.subscribe()
    }
}

/// Cooperative run/pause gate for the upload send loop: `pause()` clears
/// it, `resume()` sets it, and the send loop awaits it before every chunk.
struct RunGate {
    running: AtomicBool,
    notify: Notify,
}

impl RunGate {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            notify: Notify::new(),
        }
    }

    fn pause(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.running.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    async fn wait(&self) {
        loop {
            if self.running.load(Ordering::SeqCst) {
                return;
            }
            self.notify.notified().await;
        }
    }
}

/// The client side of a single upload session over one WebSocket
/// connection: reads a local file, emits `start` plus sequential `chunk`
/// frames, and reconciles with the server's authoritative offset.
pub struct ClientDriver {
    write_tx: mpsc::Sender<tungstenite::Message>,
    inner: Arc<Inner>,
    cancel: CancellationToken,
    chunk_size: u64,
    file_id: Mutex<Option<String>>,
    file_path: Mutex<Option<PathBuf>>,
    pumps: Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
}

impl ClientDriver {
    /// Connects to `ws_url` and spawns the read/write pump tasks. The
    /// connection is not authenticated until [`ClientDriver::auth`] is sent.
    pub async fn open(ws_url: &str) -> Result<Self, ClientError> {
        Self::open_with_chunk_size(ws_url, DEFAULT_CHUNK_SIZE).await
    }

    pub async fn open_with_chunk_size(ws_url: &str, chunk_size: u64) -> Result<Self, ClientError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url).await?;
        let (sink, stream) = ws_stream.split();

        let (write_tx, write_rx) = mpsc::channel(256);
        let cancel = CancellationToken::new();
        let inner = Arc::new(Inner {
            offset: AtomicU64::new(0),
            file_size: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            run_gate: RunGate::new(),
            pending: Mutex::new(None),
            complete_tx: watch::channel(None).0,
        });

        let write_handle = tokio::spawn(write_pump(sink, write_rx, cancel.clone()));
        let read_handle = tokio::spawn(read_pump(stream, inner.clone(), cancel.clone()));

        Ok(Self {
            write_tx,
            inner,
            cancel,
            chunk_size,
            file_id: Mutex::new(None),
            file_path: Mutex::new(None),
            pumps: Mutex::new(Some((read_handle, write_handle))),
        })
    }

    /// Sends the initial `auth` frame. The wire protocol has no ack for
    /// this: success is silent, failure closes the connection (observable
    /// as the next call returning [`ClientError::ConnectionClosed`]).
    pub async fn auth(&self, token: &str) -> Result<(), ClientError> {
        self.send(ClientAction::Auth {
            token: token.to_string(),
        })
        .await
    }

    /// Declares the file to upload and sends `start`, returning the offset
    /// the server wants the send loop to begin from.
    pub async fn start(&self, path: PathBuf, file_id: String) -> Result<u64, ClientError> {
        let metadata = tokio::fs::metadata(&path).await?;
        let file_size = metadata.len();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.bin")
            .to_string();

        self.inner.file_size.store(file_size, Ordering::SeqCst);
        *self.file_id.lock().await = Some(file_id.clone());
        *self.file_path.lock().await = Some(path);

        let (tx, rx) = oneshot::channel();
        *self.inner.pending.lock().await = Some(PendingReply::Start(tx));

        self.send(ClientAction::Start {
            file_id,
            file_name,
            file_size,
            folder_id: None,
        })
        .await?;

        let offset = rx.await.map_err(|_| ClientError::ConnectionClosed)?;
        let offset = offset.map_err(ClientError::Rejected)?;
        self.inner.offset.store(offset, Ordering::SeqCst);
        Ok(offset)
    }

    /// Streams the file from the current offset to `file_size`, honoring
    /// pause/resume and reconciling offset mismatches, then sends
    /// `complete` and waits for `complete-ack`.
    pub async fn upload(&self) -> Result<String, ClientError> {
        let file_id = self.require_file_id().await?;
        let path = self
            .file_path
            .lock()
            .await
            .clone()
            .ok_or(ClientError::NoSession)?;
        let mut file = tokio::fs::File::open(&path).await?;

        loop {
            self.inner.run_gate.wait().await;

            if self.inner.stopped.load(Ordering::SeqCst) {
                return Err(ClientError::Stopped);
            }

            let offset = self.inner.offset.load(Ordering::SeqCst);
            let file_size = self.inner.file_size.load(Ordering::SeqCst);
            if offset >= file_size {
                break;
            }

            let n = (file_size - offset).min(self.chunk_size);
            let mut buf = vec![0u8; n as usize];
            file.seek(std::io::SeekFrom::Start(offset)).await?;
            file.read_exact(&mut buf).await?;

            self.send(ClientAction::Chunk {
                file_id: file_id.clone(),
                offset,
                data: buf,
            })
            .await?;

            // Optimistic: assume the chunk landed at `offset + n`. A
            // `progress` or `offset-mismatch` event arriving after this
            // point overwrites it with the server's authoritative value.
            self.inner.offset.store(offset + n, Ordering::SeqCst);
            tokio::task::yield_now().await;
        }

        self.complete().await
    }

    /// Sends `pause` and clears the run-gate immediately — the upload loop
    /// blocks before its next chunk even before the ack arrives.
    pub async fn pause(&self) -> Result<u64, ClientError> {
        let file_id = self.require_file_id().await?;
        self.inner.run_gate.pause();

        let (tx, rx) = oneshot::channel();
        *self.inner.pending.lock().await = Some(PendingReply::Pause(tx));
        self.send(ClientAction::Pause { file_id }).await?;

        rx.await
            .map_err(|_| ClientError::ConnectionClosed)?
            .map_err(ClientError::Rejected)
    }

    /// Sends `resume` and re-sets the run-gate so the send loop proceeds
    /// without waiting for the round trip.
    pub async fn resume(&self) -> Result<u64, ClientError> {
        let file_id = self.require_file_id().await?;
        self.inner.run_gate.resume();

        let (tx, rx) = oneshot::channel();
        *self.inner.pending.lock().await = Some(PendingReply::Resume(tx));
        self.send(ClientAction::Resume { file_id }).await?;

        rx.await
            .map_err(|_| ClientError::ConnectionClosed)?
            .map_err(ClientError::Rejected)
    }

    /// Sends `stop`. Irrevocable: the upload loop observes `stopped` and
    /// exits on its next iteration.
    pub async fn stop(&self) -> Result<(), ClientError> {
        let file_id = self.require_file_id().await?;
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.run_gate.resume(); // unblock a paused loop so it can observe `stopped`

        let (tx, rx) = oneshot::channel();
        *self.inner.pending.lock().await = Some(PendingReply::Stop(tx));
        self.send(ClientAction::Stop { file_id }).await?;

        rx.await
            .map_err(|_| ClientError::ConnectionClosed)?
            .map_err(ClientError::Rejected)
    }

    /// Sends `complete` and waits for `complete-ack`, returning the
    /// destination-reported final path. The server may have already
    /// emitted `complete-ack` as soon as the final chunk's forward
    /// succeeded — that outcome is picked up here without a race.
    async fn complete(&self) -> Result<String, ClientError> {
        let file_id = self.require_file_id().await?;
        let mut rx = self.inner.complete_rx();

        if let Some(result) = rx.borrow().clone() {
            return result.map_err(ClientError::Rejected);
        }

        self.send(ClientAction::Complete { file_id }).await?;

        loop {
            rx.changed().await.map_err(|_| ClientError::ConnectionClosed)?;
            if let Some(result) = rx.borrow().clone() {
                return result.map_err(ClientError::Rejected);
            }
        }
    }

    /// The send loop's current offset. Authoritative once a `progress`,
    /// `offset-mismatch`, or ack event has been applied.
    pub fn offset(&self) -> u64 {
        self.inner.offset.load(Ordering::SeqCst)
    }

    /// Cancels the background pumps and waits for them to finish. Safe to
    /// call on every exit path — success, error, or cancellation.
    pub async fn close(&self) {
        self.cancel.cancel();
        if let Some((read_handle, write_handle)) = self.pumps.lock().await.take() {
            let _ = read_handle.await;
            let _ = write_handle.await;
        }
    }

    async fn require_file_id(&self) -> Result<String, ClientError> {
        self.file_id
            .lock()
            .await
            .clone()
            .ok_or(ClientError::NoSession)
    }

    async fn send(&self, action: ClientAction) -> Result<(), ClientError> {
        let json = serde_json::to_string(&action)?;
        self.write_tx
            .send(tungstenite::Message::Text(json.into()))
            .await
            .map_err(|_| ClientError::ConnectionClosed)
    }
}
