//! MCP tool-server protocol adapters.
//!
//! Cortex speaks JSON-RPC 2.0 to external tool servers over two transports:
//! a process pipe (newline-delimited JSON on stdin/stdout) and HTTP with
//! SSE endpoint discovery. Both share the same three-phase lifecycle:
//! `initialize` → `notifications/initialized` → request/response loop.

pub mod adapter;
pub mod config;
pub mod error;
pub mod manager;
pub mod sse;
pub mod stdio;

use serde::{Deserialize, Serialize};

pub use adapter::McpToolAdapter;
pub use config::{load_config, ToolServerConfig, Transport};
pub use error::McpError;
pub use manager::{McpManager, ServerStatus};
pub use sse::SseClient;
pub use stdio::PipeClient;

/// MCP protocol revision this client implements.
pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const CLIENT_NAME: &str = "cortex";
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Connect handshake budget.
pub const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);
/// Per-request budget after connect.
pub const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Tool definition as reported by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "default_schema")]
    pub input_schema: serde_json::Value,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// A content block from a `tools/call` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        #[serde(rename = "mimeType")]
        mime_type: String,
        data: String,
    },
    Resource {
        resource: ResourceBody,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceBody {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Parse raw content blocks, degrading unknown block types to a
/// placeholder instead of failing the whole call.
pub fn parse_content(raw: &[serde_json::Value]) -> Vec<ContentBlock> {
    raw.iter()
        .map(|v| {
            serde_json::from_value(v.clone()).unwrap_or_else(|_| ContentBlock::Text {
                text: format!(
                    "[{}: unsupported content]",
                    v.get("type").and_then(|t| t.as_str()).unwrap_or("unknown")
                ),
            })
        })
        .collect()
}

/// Flatten content blocks into LLM-consumable text.
pub fn flatten_content(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .map(|block| match block {
            ContentBlock::Text { text } => text.clone(),
            ContentBlock::Image { mime_type, .. } => format!("[Image: {mime_type}]"),
            ContentBlock::Resource { resource } => format!(
                "[Resource: {}]\n{}",
                resource.uri,
                resource.text.as_deref().unwrap_or("")
            ),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parameters for the `initialize` request.
pub(crate) fn initialize_params() -> serde_json::Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": CLIENT_VERSION,
        },
    })
}

/// Interpret a `tools/call` result: `isError` responses are tool-level
/// failures even though the transport succeeded.
pub(crate) fn parse_call_result(
    result: serde_json::Value,
    tool_name: &str,
) -> Result<Vec<ContentBlock>, McpError> {
    let raw = result
        .get("content")
        .and_then(|c| c.as_array())
        .cloned()
        .unwrap_or_default();
    let blocks = parse_content(&raw);

    if result.get("isError").and_then(|e| e.as_bool()).unwrap_or(false) {
        return Err(McpError::ToolCall(format!(
            "tool '{tool_name}' returned error: {}",
            flatten_content(&blocks)
        )));
    }
    Ok(blocks)
}

/// Transport-closed set: each tool server speaks exactly one of these.
pub enum ServerClient {
    Pipe(PipeClient),
    HttpSse(SseClient),
}

impl ServerClient {
    pub async fn connect(&mut self) -> Result<(), McpError> {
        match self {
            Self::Pipe(c) => c.connect().await,
            Self::HttpSse(c) => c.connect().await,
        }
    }

    pub async fn disconnect(&mut self) {
        match self {
            Self::Pipe(c) => c.disconnect().await,
            Self::HttpSse(c) => c.disconnect().await,
        }
    }

    pub async fn list_tools(&mut self) -> Result<Vec<McpToolInfo>, McpError> {
        match self {
            Self::Pipe(c) => c.list_tools().await,
            Self::HttpSse(c) => c.list_tools().await,
        }
    }

    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<Vec<ContentBlock>, McpError> {
        match self {
            Self::Pipe(c) => c.call_tool(name, arguments).await,
            Self::HttpSse(c) => c.call_tool(name, arguments).await,
        }
    }

    pub fn connected(&self) -> bool {
        match self {
            Self::Pipe(c) => c.connected(),
            Self::HttpSse(c) => c.connected(),
        }
    }
}
