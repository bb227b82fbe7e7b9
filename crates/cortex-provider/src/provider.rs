use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single message in the conversation handed to a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

/// Tool definition sent to providers with native function calling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A structured tool call emitted by a native-function-calling provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Request to an LLM provider.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub model: String,
    /// System prompt. Providers without a dedicated system slot prepend it
    /// as a system-role message.
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Tools for native function calling. Shim-mode providers ignore this —
    /// their tool descriptions travel inside the system prompt.
    pub tools: Vec<ToolDefinition>,
    /// Raw JSON messages for the native tool loop (overrides `messages`
    /// when set). Lets the loop carry structured tool_use / tool_result
    /// blocks that plain strings can't represent.
    pub raw_messages: Option<Vec<serde_json::Value>>,
    /// Requesting user, when known. Remote providers prefer this user's
    /// stored API key over the service key.
    pub user_id: Option<String>,
}

/// Response from an LLM provider.
#[derive(Debug, Clone, Default)]
pub struct GenerateResponse {
    pub content: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub stop_reason: String,
    /// Tool calls requested by the LLM. Always empty for shim-mode
    /// providers.
    pub tool_calls: Vec<NativeToolCall>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// True for failures that a retry against the same backend could fix.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Http(_) | ProviderError::Unavailable(_))
    }
}

/// Common interface for all LLM backends.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stable identifier used in model preferences (e.g. "ollama").
    fn id(&self) -> &str;

    /// Human-readable name for logs and the model selector.
    fn name(&self) -> &str;

    /// Whether the provider consumes tool specs and emits structured tool
    /// calls. When false, the shim protocol applies.
    fn supports_native_tools(&self) -> bool {
        false
    }

    /// Send a request and wait for the full response.
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, ProviderError>;

    /// Cheap liveness probe.
    async fn health_check(&self) -> bool;

    /// Models this backend can serve.
    async fn list_models(&self) -> Result<Vec<String>, ProviderError>;
}
