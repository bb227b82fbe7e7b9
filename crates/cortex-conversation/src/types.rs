use serde::{Deserialize, Serialize};

use cortex_provider::Role;

/// One stored conversation turn.
///
/// `metadata` carries provenance (model, tokens, latency, context flags,
/// summary markers) and is deliberately unstructured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    /// RFC 3339, UTC. The sequence in a record is non-decreasing.
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl StoredMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// True for the system message a summarization pass inserts.
    pub fn is_summary(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("type"))
            .and_then(|t| t.as_str())
            .map(|t| t == "summary")
            .unwrap_or(false)
    }
}

/// On-disk conversation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub thread_id: String,
    pub user_id: String,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
}

/// Listing entry for a user's conversations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMeta {
    pub thread_id: String,
    pub created_at: String,
    pub updated_at: String,
    pub message_count: usize,
}
