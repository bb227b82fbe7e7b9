//! Secret resolution for Cortex.
//!
//! The core never embeds credentials: API keys, tool-server tokens, and
//! transport headers reference secrets by name, and a [`SecretStore`]
//! resolves them at startup. Two backends: the process environment (default)
//! and an HTTP secret service with a bearer token.
//!
//! Config values of the form `secret:NAME` are resolved via
//! [`resolve_ref`]; anything else passes through unchanged.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

/// Prefix marking a config value as a secret reference.
pub const SECRET_REF_PREFIX: &str = "secret:";

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret not found: {0}")]
    NotFound(String),

    #[error("secret backend error: {0}")]
    Backend(String),
}

/// Name-keyed secret lookup.
///
/// Backends must not log secret values; errors carry only the name.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<String, SecretError>;
}

/// Resolve a config value that may be a `secret:NAME` reference.
///
/// Plain values are returned as-is. A reference that fails to resolve
/// propagates the error so the caller can decide whether it is fatal.
pub async fn resolve_ref(store: &dyn SecretStore, value: &str) -> Result<String, SecretError> {
    match value.strip_prefix(SECRET_REF_PREFIX) {
        Some(name) => store.get(name).await,
        None => Ok(value.to_string()),
    }
}

/// Returns true if the value is a `secret:NAME` reference.
pub fn is_secret_ref(value: &str) -> bool {
    value.starts_with(SECRET_REF_PREFIX)
}

/// Reads secrets from process environment variables, name used verbatim.
pub struct EnvSecretStore;

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get(&self, name: &str) -> Result<String, SecretError> {
        std::env::var(name).map_err(|_| SecretError::NotFound(name.to_string()))
    }
}

/// HTTP secret service client (`GET {base}/secrets/{name}` with bearer auth).
///
/// The service returns `{"value": "..."}`. 404 maps to `NotFound`; anything
/// else is a backend error.
pub struct HttpSecretStore {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpSecretStore {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    /// Probe the backend. Used at startup: a configured-but-unreachable
    /// secret store is a fatal initialization error.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).bearer_auth(&self.token).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(error = %e, "secret store health check failed");
                false
            }
        }
    }
}

#[derive(serde::Deserialize)]
struct SecretBody {
    value: String,
}

#[async_trait]
impl SecretStore for HttpSecretStore {
    async fn get(&self, name: &str) -> Result<String, SecretError> {
        let url = format!("{}/secrets/{}", self.base_url, name);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SecretError::Backend(e.to_string()))?;

        if resp.status().as_u16() == 404 {
            return Err(SecretError::NotFound(name.to_string()));
        }
        if !resp.status().is_success() {
            return Err(SecretError::Backend(format!(
                "secret store returned {}",
                resp.status()
            )));
        }

        let body: SecretBody = resp
            .json()
            .await
            .map_err(|e| SecretError::Backend(e.to_string()))?;
        debug!(name, "secret resolved");
        Ok(body.value)
    }
}
