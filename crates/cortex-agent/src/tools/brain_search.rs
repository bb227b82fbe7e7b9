use std::sync::Arc;

use async_trait::async_trait;

use cortex_hooks::current_tracker;
use cortex_search::semantic::{self, SemanticSearchClient};
use cortex_tool::{Tool, ToolResult};

/// Minimum relevance score for brain results; below this, only the single
/// top hit survives.
pub const MIN_RELEVANCE: f64 = 0.7;

/// Semantic search over the user's knowledge base.
pub struct BrainSearchTool {
    client: Arc<SemanticSearchClient>,
    max_results: usize,
}

impl BrainSearchTool {
    pub fn new(client: Arc<SemanticSearchClient>, max_results: usize) -> Self {
        Self { client, max_results }
    }
}

#[async_trait]
impl Tool for BrainSearchTool {
    fn name(&self) -> &str {
        "brain_search"
    }

    fn display_name(&self) -> &str {
        "Brain Search"
    }

    fn description(&self) -> &str {
        "Search the user's personal knowledge base (notes, documents, journal). \
         Use for questions about things the user has written down or saved."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Natural-language search query"
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

        let results = self.client.search(query, self.max_results).await;
        let results = SemanticSearchClient::filter_relevant(results, MIN_RELEVANCE);

        if let Some(tracker) = current_tracker() {
            tracker.record(
                self.name(),
                true,
                results.iter().map(|r| r.file.clone()).collect(),
                results.iter().map(|r| r.entry.chars().take(120).collect()).collect(),
            );
        }

        if results.is_empty() {
            return ToolResult::success(self.name(), format!("No notes found for: {query}"));
        }
        ToolResult::success(self.name(), semantic::format_results(&results, 300))
            .with_raw(serde_json::to_value(
                results
                    .iter()
                    .map(|r| serde_json::json!({"file": r.file, "score": r.score}))
                    .collect::<Vec<_>>(),
            )
            .unwrap_or_default())
    }

    async fn health_check(&self) -> bool {
        self.client.health_check().await
    }
}
