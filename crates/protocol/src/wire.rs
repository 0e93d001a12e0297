//! Flat, tagged wire messages exchanged between client and server.
//!
//! Client → server frames are discriminated by `action`; server → client
//! frames by `event`. Both are internally-tagged enums, so a frame whose
//! discriminator doesn't match a known variant fails to deserialize rather
//! than silently falling into a default branch somewhere downstream.

use serde::{Deserialize, Serialize};

/// A frame sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ClientAction {
    #[serde(rename = "auth")]
    Auth { token: String },

    #[serde(rename = "start", rename_all = "camelCase")]
    Start {
        file_id: String,
        file_name: String,
        file_size: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        folder_id: Option<String>,
    },

    #[serde(rename = "chunk", rename_all = "camelCase")]
    Chunk {
        file_id: String,
        offset: u64,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },

    #[serde(rename = "pause", rename_all = "camelCase")]
    Pause { file_id: String },

    #[serde(rename = "resume", rename_all = "camelCase")]
    Resume { file_id: String },

    #[serde(rename = "stop", rename_all = "camelCase")]
    Stop { file_id: String },

    #[serde(rename = "complete", rename_all = "camelCase")]
    Complete { file_id: String },

    #[serde(rename = "download-start", rename_all = "camelCase")]
    DownloadStart {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },

    #[serde(rename = "download-pause", rename_all = "camelCase")]
    DownloadPause { session_id: String },

    #[serde(rename = "download-resume", rename_all = "camelCase")]
    DownloadResume { session_id: String },

    #[serde(rename = "download-stop", rename_all = "camelCase")]
    DownloadStop { session_id: String },
}

/// A frame sent from the server to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ServerEvent {
    #[serde(rename = "start-ack", rename_all = "camelCase")]
    StartAck { file_id: String, offset: u64 },

    #[serde(rename = "progress", rename_all = "camelCase")]
    Progress {
        file_id: String,
        offset: u64,
        percent: f64,
    },

    #[serde(rename = "pause-ack", rename_all = "camelCase")]
    PauseAck { file_id: String, offset: u64 },

    #[serde(rename = "resume-ack", rename_all = "camelCase")]
    ResumeAck { file_id: String, offset: u64 },

    #[serde(rename = "stop-ack", rename_all = "camelCase")]
    StopAck { file_id: String },

    #[serde(rename = "offset-mismatch", rename_all = "camelCase")]
    OffsetMismatch { file_id: String, expected: u64 },

    #[serde(rename = "complete-ack", rename_all = "camelCase")]
    CompleteAck { file_id: String, file_path: String },

    #[serde(rename = "error", rename_all = "camelCase")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_id: Option<String>,
        error: String,
    },

    #[serde(rename = "download-start-ack", rename_all = "camelCase")]
    DownloadStartAck { session_id: String },

    #[serde(rename = "download-info", rename_all = "camelCase")]
    DownloadInfo {
        session_id: String,
        total_size: u64,
        filename: String,
    },

    #[serde(rename = "download-progress", rename_all = "camelCase")]
    DownloadProgress {
        session_id: String,
        downloaded_bytes: u64,
        total_size: u64,
        progress: f64,
    },

    #[serde(rename = "download-complete", rename_all = "camelCase")]
    DownloadComplete {
        session_id: String,
        file_path: String,
        /// Bytes actually written, not necessarily the originally inferred
        /// `Content-Length` — the only size known at all when the source
        /// never reported one.
        total_size: u64,
    },

    #[serde(rename = "download-error", rename_all = "camelCase")]
    DownloadError {
        session_id: String,
        error: String,
    },
}

/// Custom base64 serde module: JSON strings ↔ raw bytes, matching the
/// wire's base64-encoded `data` field with no implicit trimming.
pub mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
