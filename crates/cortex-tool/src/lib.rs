//! Tool system: the `Tool` trait, the registry with per-user enable state,
//! and the executor that parses tool-call markers and drives the tool loop.
//!
//! Tools come from three sources — built-ins, external tool servers, and
//! skills — and all meet the same small contract: a name, a description, a
//! JSON-Schema parameter object, and `execute`.

pub mod executor;
pub mod registry;
pub mod spec;
pub mod state;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use executor::{
    execute_by_name, execute_tool_call, parse_tool_call, run_native_tool_loop,
    run_shim_tool_loop, ParsedToolCall, MAX_TOOL_ROUNDS, TOOL_TIMEOUT,
};
pub use registry::ToolRegistry;
pub use spec::{build_shim_system_prompt, FunctionSpec};
pub use state::ToolStateStore;

/// Where a tool comes from. Skills are LLM-callable but hidden from
/// user-facing enable/disable surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Builtin,
    Remote,
    Skill,
}

impl std::fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Builtin => write!(f, "builtin"),
            Self::Remote => write!(f, "remote"),
            Self::Skill => write!(f, "skill"),
        }
    }
}

/// Structured result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub success: bool,
    /// LLM-consumable text, injected into the conversation.
    pub content: String,
    /// Machine-readable output preserved for hooks and UI surfaces.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub executed_at: String,
}

impl ToolResult {
    pub fn success(tool_name: &str, content: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            success: true,
            content: content.into(),
            raw: None,
            error: None,
            executed_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(tool_name: &str, error: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            success: false,
            content: String::new(),
            raw: None,
            error: Some(error.into()),
            executed_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }

    /// Render for prompt injection (`[Tool result]` turns in shim mode).
    pub fn to_context_string(&self) -> String {
        if self.success {
            format!("[Tool: {}]\n{}", self.tool_name, self.content)
        } else {
            format!(
                "[Tool: {}] ERROR: {}",
                self.tool_name,
                self.error.as_deref().unwrap_or("unknown error")
            )
        }
    }
}

/// Contract every tool meets, regardless of origin.
///
/// Arguments are validated by the tool itself against its own schema; the
/// executor passes them through untouched. `user_id` is the ambient
/// per-request parameter for user-scoped tools (facts, preferences).
#[async_trait]
pub trait Tool: Send + Sync {
    /// Globally unique slug (e.g. "web_search", "mcp_github_list_repos").
    fn name(&self) -> &str;

    /// Human-readable name for management UIs.
    fn display_name(&self) -> &str {
        self.name()
    }

    /// LLM-facing description, used in function specs and shim prompts.
    fn description(&self) -> &str;

    fn category(&self) -> ToolCategory {
        ToolCategory::Builtin
    }

    /// JSON-Schema object describing the parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute with the given arguments. Returns a result, never panics.
    async fn execute(&self, args: serde_json::Value, user_id: &str) -> ToolResult;

    /// Whether the tool is currently able to execute.
    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_string_formats_success_and_error() {
        let ok = ToolResult::success("web_search", "three results");
        assert_eq!(ok.to_context_string(), "[Tool: web_search]\nthree results");

        let err = ToolResult::error("web_search", "timed out");
        assert_eq!(err.to_context_string(), "[Tool: web_search] ERROR: timed out");
    }

    #[test]
    fn category_display() {
        assert_eq!(ToolCategory::Remote.to_string(), "remote");
        assert_eq!(ToolCategory::Skill.to_string(), "skill");
    }
}
