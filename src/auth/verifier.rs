//! Identity verification against the external session service.
//!
//! The verifier is a plain function of an opaque bearer credential. The same
//! implementation backs both the REST layer and the gateway handshake; the
//! gateway never fabricates an HTTP request to reuse middleware.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// The authenticated caller, as claimed by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub organization_id: String,
}

/// Abstraction over the external identity/session service.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Resolve an opaque credential to the identity it was issued to.
    async fn verify(&self, credential: &str) -> Result<Identity, AuthError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Verifier backed by the identity service's session-verification endpoint.
#[derive(Clone)]
pub struct HttpIdentityVerifier {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    credential: &'a str,
}

impl HttpIdentityVerifier {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    async fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
        let url = format!("{}/api/v1/sessions/verify", self.base_url);

        let resp = self
            .http
            .post(&url)
            .json(&VerifyRequest { credential })
            .send()
            .await
            .map_err(|e| {
                tracing::error!(?e, "identity service request failed");
                AuthError::Unavailable
            })?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AuthError::InvalidCredential);
        }
        if !resp.status().is_success() {
            tracing::error!(status = %resp.status(), "identity service returned an error");
            return Err(AuthError::Unavailable);
        }

        resp.json::<Identity>().await.map_err(|e| {
            tracing::error!(?e, "identity service response parse failed");
            AuthError::Unavailable
        })
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (for tests / local development)
// ---------------------------------------------------------------------------

/// Verifier backed by a fixed credential → identity map.
pub struct StaticVerifier {
    credentials: Mutex<HashMap<String, Identity>>,
}

impl StaticVerifier {
    pub fn new() -> Self {
        Self {
            credentials: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, credential: &str, identity: Identity) {
        self.credentials
            .lock()
            .insert(credential.to_string(), identity);
    }
}

impl Default for StaticVerifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityVerifier for StaticVerifier {
    async fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
        self.credentials
            .lock()
            .get(credential)
            .cloned()
            .ok_or(AuthError::InvalidCredential)
    }
}
