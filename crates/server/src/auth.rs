//! The Auth Gate (C4): verifies a bearer token against the external user
//! store and binds the resulting identity to a connection.

use fileferry_transfer::AuthContext;
use serde::Deserialize;

/// Errors from token verification.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("auth store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("token rejected by auth store")]
    Rejected,
}

/// An external, opaque token → user lookup. The crate does not mandate a
/// particular backing transport; [`HttpAuthStore`] is the shipped default.
#[async_trait::async_trait]
pub trait AuthStore: Send + Sync + 'static {
    async fn authenticate(&self, token: &str) -> Result<AuthContext, AuthError>;
}

#[derive(Deserialize)]
struct VerifyResponse {
    user_id: String,
}

/// Verifies tokens with a single POST to a configurable endpoint.
pub struct HttpAuthStore {
    http: reqwest::Client,
    verify_url: String,
}

impl HttpAuthStore {
    pub fn new(http: reqwest::Client, verify_url: String) -> Self {
        Self { http, verify_url }
    }
}

#[async_trait::async_trait]
impl AuthStore for HttpAuthStore {
    async fn authenticate(&self, token: &str) -> Result<AuthContext, AuthError> {
        let resp = self
            .http
            .post(&self.verify_url)
            .bearer_auth(token)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(AuthError::Rejected);
        }

        let body: VerifyResponse = resp.json().await?;
        Ok(AuthContext {
            user_id: body.user_id,
            user_token: token.to_string(),
        })
    }
}
