//! The Session Store (C1): in-memory registry of upload sessions, and of
//! which connection owns which sessions and under what authenticated
//! identity.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::TransferError;
use crate::staging;
use crate::upload::{UploadSession, UploadStatus};
use crate::validation::sanitize_file_name;

/// Identity bound to a connection once the Auth Gate accepts it. Passed
/// explicitly into every call that needs it — no ambient "current user".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: String,
    pub user_token: String,
}

/// Per-connection bookkeeping: auth state and the set of file ids this
/// connection has created or adopted.
#[derive(Debug, Default)]
pub struct ConnectionRecord {
    pub auth: Option<AuthContext>,
    pub owned_sessions: HashSet<String>,
}

impl ConnectionRecord {
    pub fn is_authenticated(&self) -> bool {
        self.auth.is_some()
    }
}

/// In-memory registry mapping `file_id` to its session, plus the
/// connection → auth/ownership bookkeeping described in the data model.
pub struct SessionStore {
    staging_dir: PathBuf,
    sessions: Mutex<HashMap<String, Arc<UploadSession>>>,
    connections: Mutex<HashMap<u64, ConnectionRecord>>,
}

impl SessionStore {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            sessions: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub async fn register_connection(&self, connection_id: u64) {
        self.connections
            .lock()
            .await
            .insert(connection_id, ConnectionRecord::default());
    }

    pub async fn authenticate_connection(&self, connection_id: u64, auth: AuthContext) {
        if let Some(record) = self.connections.lock().await.get_mut(&connection_id) {
            record.auth = Some(auth);
        }
    }

    pub async fn connection_auth(&self, connection_id: u64) -> Option<AuthContext> {
        self.connections
            .lock()
            .await
            .get(&connection_id)
            .and_then(|r| r.auth.clone())
    }

    /// Returns the existing session for `file_id`, if any.
    pub async fn get(&self, file_id: &str) -> Option<Arc<UploadSession>> {
        self.sessions.lock().await.get(file_id).cloned()
    }

    /// C1 contract: returns the existing session (declared name/size
    /// refreshed, `user_id` untouched) or creates one, seeding
    /// `bytes_received` from an orphaned `.part` file if present —
    /// whether or not a session record already existed in memory.
    pub async fn get_or_create(
        &self,
        connection_id: u64,
        file_id: &str,
        file_name: &str,
        file_size: u64,
        folder_id: Option<String>,
        auth: &AuthContext,
    ) -> Result<Arc<UploadSession>, TransferError> {
        let sanitized = sanitize_file_name(file_name)?;
        let temp_path = staging::staging_path(&self.staging_dir, file_id, &sanitized);

        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(file_id) {
            if existing.user_id != auth.user_id {
                return Err(TransferError::OwnershipMismatch(file_id.to_string()));
            }
            let session = existing.clone();
            drop(sessions);
            session
                .update_declared(file_name.to_string(), sanitized, file_size)
                .await;
            self.own(connection_id, file_id).await;
            return Ok(session);
        }

        let bytes_received = staging::existing_length(&temp_path).await.unwrap_or(0);
        let session = Arc::new(UploadSession::new(
            file_id.to_string(),
            file_name.to_string(),
            sanitized,
            file_size,
            folder_id,
            auth.user_id.clone(),
            auth.user_token.clone(),
            temp_path,
            bytes_received,
        ));
        sessions.insert(file_id.to_string(), session.clone());
        drop(sessions);

        self.own(connection_id, file_id).await;
        Ok(session)
    }

    async fn own(&self, connection_id: u64, file_id: &str) {
        if let Some(record) = self.connections.lock().await.get_mut(&connection_id) {
            record.owned_sessions.insert(file_id.to_string());
        }
    }

    /// Discards the session record. The caller remains responsible for any
    /// staging-file disposition.
    pub async fn remove(&self, file_id: &str) -> Option<Arc<UploadSession>> {
        self.sessions.lock().await.remove(file_id)
    }

    /// On disconnect: every `active` session owned by this connection is
    /// paused, not destroyed, so a reconnect can resume it.
    pub async fn on_disconnect(&self, connection_id: u64) {
        let owned = {
            let mut conns = self.connections.lock().await;
            conns.remove(&connection_id).map(|r| r.owned_sessions)
        };
        let Some(owned) = owned else { return };

        let sessions = self.sessions.lock().await;
        for file_id in owned {
            if let Some(session) = sessions.get(&file_id)
                && session.status().await == UploadStatus::Active
            {
                session.set_status(UploadStatus::Paused).await;
            }
        }
    }
}
