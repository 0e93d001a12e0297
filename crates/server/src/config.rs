//! Environment-driven server configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::ServerError;

const MIN_CHUNK_SIZE: u64 = 1024;
const MAX_CHUNK_SIZE: u64 = 1024 * 1024;

/// HTTP timeouts shared by the Auth Gate, Remote Forwarder, and Download
/// Engine — they all go through the same [`reqwest::Client`].
pub const HTTP_TOTAL_TIMEOUT: Duration = Duration::from_secs(300);
pub const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Server-side configuration, assembled from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the WebSocket listener on, e.g. `0.0.0.0:8080`.
    pub ws_bind_addr: String,
    /// Destination the Remote Forwarder streams completed uploads to.
    pub remote_upload_url: String,
    /// Bearer token identifying this server to the downstream receiver,
    /// if it requires one in addition to the per-user token.
    pub remote_server_token: Option<String>,
    /// Endpoint the Auth Gate posts bearer tokens to for verification.
    pub auth_verify_url: String,
    /// Directory holding in-progress `.part` files.
    pub staging_dir: PathBuf,
    /// Chunk size the client driver is told to use, in bytes.
    pub chunk_size: u64,
}

impl Config {
    /// Reads configuration from the process environment, applying the
    /// documented defaults and rejecting out-of-range values.
    pub fn from_env() -> Result<Self, ServerError> {
        let ws_bind_addr =
            std::env::var("WS_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let remote_upload_url = std::env::var("REMOTE_UPLOAD_URL")
            .map_err(|_| ServerError::Config("REMOTE_UPLOAD_URL is required".into()))?;
        let auth_verify_url = std::env::var("AUTH_VERIFY_URL")
            .map_err(|_| ServerError::Config("AUTH_VERIFY_URL is required".into()))?;
        let remote_server_token = std::env::var("REMOTE_SERVER_TOKEN").ok();
        let staging_dir = std::env::var("STAGING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./staging"));
        let chunk_size = match std::env::var("CHUNK_SIZE") {
            Ok(v) => v
                .parse::<u64>()
                .map_err(|_| ServerError::Config("CHUNK_SIZE must be an integer".into()))?,
            Err(_) => 65_536,
        };

        let config = Self {
            ws_bind_addr,
            remote_upload_url,
            remote_server_token,
            auth_verify_url,
            staging_dir,
            chunk_size,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ServerError> {
        for (name, url) in [
            ("REMOTE_UPLOAD_URL", &self.remote_upload_url),
            ("AUTH_VERIFY_URL", &self.auth_verify_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ServerError::Config(format!("{name} must be an absolute URL")));
            }
        }
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(ServerError::Config(format!(
                "CHUNK_SIZE must be between {MIN_CHUNK_SIZE} and {MAX_CHUNK_SIZE}"
            )));
        }
        Ok(())
    }
}
