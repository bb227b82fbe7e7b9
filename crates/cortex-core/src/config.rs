use figment::{providers::Env, Figment};
use serde::{Deserialize, Serialize};

use crate::error::{CortexError, Result};

/// Overall token budget for the context composer when `MAX_CONTEXT_TOKENS`
/// is not set. All token-budget reasoning shares the `len / 4` estimate.
pub const DEFAULT_MAX_CONTEXT_TOKENS: usize = 6000;

/// Recent messages always kept verbatim through summarization.
pub const DEFAULT_KEEP_RECENT: usize = 3;

/// Service configuration, read from the environment-variable table.
///
/// Every field has a default so the service can boot in a bare environment;
/// `SECRET_STORE_URL` without a reachable backend is the one fatal case,
/// enforced at startup rather than here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root path for the user knowledge base and per-user state files.
    #[serde(default = "default_brain_folder")]
    pub brain_folder: String,
    /// Semantic-search service base URL.
    #[serde(default = "default_search_url")]
    pub search_url: String,
    /// Default pipe-inference (Ollama) server URL.
    #[serde(default = "default_llm_url")]
    pub llm_url: String,
    /// Default model name.
    #[serde(default = "default_model")]
    pub model: String,
    /// Token budget for the context composer.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
    #[serde(default = "bool_true")]
    pub enable_brain_search: bool,
    #[serde(default = "bool_true")]
    pub enable_web_search: bool,
    /// Web search provider id: "searx" (keyless metasearch) or "tavily".
    #[serde(default = "default_web_search_provider")]
    pub web_search_provider: String,
    /// API key for the web search provider, or a `secret:NAME` reference.
    #[serde(default)]
    pub web_search_api_key: Option<String>,
    /// Notification channel identifier (ntfy topic).
    #[serde(default)]
    pub notify_topic: Option<String>,
    /// Secret backend base URL. When unset, secrets resolve from the
    /// process environment.
    #[serde(default)]
    pub secret_store_url: Option<String>,
    #[serde(default)]
    pub secret_store_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            brain_folder: default_brain_folder(),
            search_url: default_search_url(),
            llm_url: default_llm_url(),
            model: default_model(),
            max_context_tokens: default_max_context_tokens(),
            enable_brain_search: true,
            enable_web_search: true,
            web_search_provider: default_web_search_provider(),
            web_search_api_key: None,
            notify_topic: None,
            secret_store_url: None,
            secret_store_token: None,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Only the documented variable names are read; anything else in the
    /// environment is ignored.
    pub fn load() -> Result<Self> {
        let config: Config = Figment::new()
            .merge(Env::raw().only(&[
                "brain_folder",
                "search_url",
                "llm_url",
                "model",
                "max_context_tokens",
                "enable_brain_search",
                "enable_web_search",
                "web_search_provider",
                "web_search_api_key",
                "notify_topic",
                "secret_store_url",
                "secret_store_token",
            ]))
            .extract()
            .map_err(|e| CortexError::Config(e.to_string()))?;
        Ok(config)
    }
}

fn default_brain_folder() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/brain", home)
}
fn default_search_url() -> String {
    "http://localhost:9514".to_string()
}
fn default_llm_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "llama3.2".to_string()
}
fn default_max_context_tokens() -> usize {
    DEFAULT_MAX_CONTEXT_TOKENS
}
fn default_web_search_provider() -> String {
    "searx".to_string()
}
fn bool_true() -> bool {
    true
}
