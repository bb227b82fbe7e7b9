use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::error;

use cortex_tool::{Tool, ToolCategory, ToolResult};

use crate::{flatten_content, ServerClient};

/// Wraps one tool from a tool server's `tools/list` as a registry [`Tool`].
///
/// Name convention: `mcp_{server}_{tool}`. The adapter shares the server's
/// client handle; the mutex makes calls single-flight per server.
pub struct McpToolAdapter {
    name: String,
    display_name: String,
    description: String,
    remote_name: String,
    input_schema: serde_json::Value,
    client: Arc<Mutex<ServerClient>>,
}

impl McpToolAdapter {
    pub fn new(
        server_name: &str,
        remote_name: &str,
        description: &str,
        input_schema: serde_json::Value,
        client: Arc<Mutex<ServerClient>>,
    ) -> Self {
        Self {
            name: format!("mcp_{server_name}_{remote_name}"),
            display_name: format!("[{server_name}] {remote_name}"),
            description: if description.is_empty() {
                format!("Tool-server tool: {remote_name}")
            } else {
                description.to_string()
            },
            remote_name: remote_name.to_string(),
            input_schema,
            client,
        }
    }
}

#[async_trait]
impl Tool for McpToolAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Remote
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.input_schema.clone()
    }

    async fn execute(&self, args: serde_json::Value, _user_id: &str) -> ToolResult {
        let mut client = self.client.lock().await;
        match client.call_tool(&self.remote_name, args).await {
            Ok(blocks) => {
                let raw = serde_json::to_value(&blocks).unwrap_or_default();
                ToolResult::success(&self.name, flatten_content(&blocks)).with_raw(raw)
            }
            Err(e) => {
                error!(tool = %self.name, error = %e, "tool-server call failed");
                ToolResult::error(&self.name, e.to_string())
            }
        }
    }

    async fn health_check(&self) -> bool {
        self.client.lock().await.connected()
    }
}
