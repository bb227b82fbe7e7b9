use std::sync::Arc;

use async_trait::async_trait;

use cortex_hooks::current_tracker;
use cortex_search::web::WebSearchClient;
use cortex_tool::{Tool, ToolResult};

/// Web search for current information.
pub struct WebSearchTool {
    client: Arc<WebSearchClient>,
}

impl WebSearchTool {
    pub fn new(client: Arc<WebSearchClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn display_name(&self) -> &str {
        "Web Search"
    }

    fn description(&self) -> &str {
        "Search the web for current information: news, prices, weather, \
         recent events. Use when the answer depends on up-to-date data \
         rather than the user's own notes."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum results (default 5)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: serde_json::Value, _user_id: &str) -> ToolResult {
        let query = match args.get("query").and_then(|v| v.as_str()) {
            Some(q) if !q.trim().is_empty() => q.trim(),
            _ => return ToolResult::error(self.name(), "missing required parameter: query"),
        };
        let limit = args.get("limit").and_then(|v| v.as_u64()).map(|n| n as usize);

        let results = self.client.search(query, limit).await;

        if let Some(tracker) = current_tracker() {
            tracker.record(
                self.name(),
                true,
                results.iter().map(|r| r.source_domain.clone()).collect(),
                results.iter().map(|r| r.snippet.chars().take(120).collect()).collect(),
            );
        }

        if results.is_empty() {
            return ToolResult::success(self.name(), format!("No web results for: {query}"));
        }
        ToolResult::success(self.name(), WebSearchClient::format_results(&results, 200))
            .with_raw(serde_json::to_value(&results).unwrap_or_default())
    }

    async fn health_check(&self) -> bool {
        self.client.health_check().await
    }
}
