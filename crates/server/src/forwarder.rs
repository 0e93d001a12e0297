//! The Remote Forwarder (C5): streams a completed staging file to the
//! downstream HTTP receiver once an upload reaches `file_size`.

use fileferry_transfer::UploadSession;
use serde::Deserialize;
use tokio_util::io::ReaderStream;

/// Outcome of a forward attempt.
#[derive(Debug)]
pub enum ForwardOutcome {
    /// 2xx response; carries the destination-reported final path.
    Success { file_path: String },
    /// Non-2xx response or transport failure; staging file is left intact.
    Failed { message: String },
}

#[derive(Deserialize)]
struct ForwardResponse {
    /// The destination's identifier for the stored artifact. Accepted as
    /// either a JSON string or a JSON number — the reference receiver
    /// returns a database autoincrement id, which serializes as a bare
    /// integer, not a string.
    #[serde(default)]
    file_id: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

/// Renders a `file_id`/`message` value from the destination's response as
/// plain text, regardless of whether it arrived as a JSON string or number.
fn stringify(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Streams `session`'s staging file to `upload_url`, annotated with the
/// bit-exact headers the downstream receiver expects.
pub async fn forward(
    http: &reqwest::Client,
    upload_url: &str,
    session: &UploadSession,
) -> ForwardOutcome {
    let file = match tokio::fs::File::open(&session.temp_path).await {
        Ok(f) => f,
        Err(e) => {
            return ForwardOutcome::Failed {
                message: format!("failed to open staging file: {e}"),
            };
        }
    };
    let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

    let mut request = http
        .post(upload_url)
        .header("X-File-Name", session.original_name().await)
        .header("X-File-Size", session.file_size().await.to_string())
        .header("X-File-ID", session.file_id.clone())
        .bearer_auth(&session.user_token)
        .body(body);

    if let Some(folder_id) = &session.folder_id {
        request = request.header("X-Folder-ID", folder_id.clone());
    }

    let resp = match request.send().await {
        Ok(r) => r,
        Err(e) => {
            return ForwardOutcome::Failed {
                message: format!("transport error: {e}"),
            };
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        return ForwardOutcome::Failed {
            message: format!("destination responded {status}"),
        };
    }

    match resp.json::<ForwardResponse>().await {
        Ok(body) => {
            let file_path = body
                .file_id
                .as_ref()
                .and_then(stringify)
                .or(body.message)
                .unwrap_or(session.file_name().await);
            ForwardOutcome::Success { file_path }
        }
        Err(e) => ForwardOutcome::Failed {
            message: format!("invalid destination response: {e}"),
        },
    }
}
