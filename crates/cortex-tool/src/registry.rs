use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use cortex_provider::ToolDefinition;

use crate::spec::{self, FunctionSpec};
use crate::state::ToolStateStore;
use crate::{Tool, ToolCategory};

/// Single source of truth for every registered tool.
///
/// Read-mostly: the executor only reads; writers are startup wiring and the
/// tool-server manager (register on connect, unregister on disconnect).
/// Registration overwrites on name collision — that is how a reconnecting
/// tool server refreshes its tools.
pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn Tool>>,
    state: ToolStateStore,
}

impl ToolRegistry {
    pub fn new(state: ToolStateStore) -> Self {
        Self {
            tools: DashMap::new(),
            state,
        }
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            warn!(tool = %name, "overwriting existing tool registration");
        }
        info!(tool = %name, category = %tool.category(), "tool registered");
        self.tools.insert(name, tool);
    }

    /// Remove a tool (e.g. when its tool server disconnects).
    pub fn unregister(&self, tool_name: &str) -> bool {
        let removed = self.tools.remove(tool_name).is_some();
        if removed {
            info!(tool = tool_name, "tool unregistered");
        }
        removed
    }

    pub fn get(&self, tool_name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(tool_name).map(|t| t.clone())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// List tools, optionally filtered by category and per-user enablement.
    pub fn list(
        &self,
        category: Option<ToolCategory>,
        enabled_for: Option<&str>,
    ) -> Vec<Arc<dyn Tool>> {
        self.tools
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|t| category.map(|c| t.category() == c).unwrap_or(true))
            .filter(|t| {
                enabled_for
                    .map(|user| self.state.is_enabled(user, t.name()))
                    .unwrap_or(true)
            })
            .collect()
    }

    pub fn is_enabled(&self, user_id: &str, tool_name: &str) -> bool {
        self.state.is_enabled(user_id, tool_name)
    }

    pub fn set_enabled(
        &self,
        user_id: &str,
        tool_name: &str,
        enabled: bool,
    ) -> std::io::Result<()> {
        self.state.set_enabled(user_id, tool_name, enabled)
    }

    /// Tools offered to the LLM for a user: everything enabled, minus
    /// skills (those are injected by name, not user-managed).
    pub fn enabled_for_llm(&self, user_id: &str) -> Vec<Arc<dyn Tool>> {
        self.tools
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|t| t.category() != ToolCategory::Skill)
            .filter(|t| self.state.is_enabled(user_id, t.name()))
            .collect()
    }

    /// Native function-calling specs for the enabled tools.
    pub fn function_specs(&self, user_id: &str) -> Vec<FunctionSpec> {
        self.enabled_for_llm(user_id)
            .iter()
            .map(|t| FunctionSpec::from_tool(t.as_ref()))
            .collect()
    }

    /// Provider-level tool definitions for the enabled tools.
    pub fn tool_definitions(&self, user_id: &str) -> Vec<ToolDefinition> {
        self.function_specs(user_id)
            .into_iter()
            .map(FunctionSpec::into_definition)
            .collect()
    }

    /// Plaintext tool block for shim-mode prompts, empty when the user has
    /// nothing enabled.
    pub fn prompt_descriptions(&self, user_id: &str) -> String {
        let mut tools = self.enabled_for_llm(user_id);
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
            .iter()
            .map(|t| spec::prompt_description(t.as_ref()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolResult;
    use async_trait::async_trait;

    struct NamedTool {
        name: &'static str,
        category: ToolCategory,
    }

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn category(&self) -> ToolCategory {
            self.category
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _args: serde_json::Value, _user_id: &str) -> ToolResult {
            ToolResult::success(self.name, "ok")
        }
    }

    fn registry_in(dir: &tempfile::TempDir) -> ToolRegistry {
        ToolRegistry::new(ToolStateStore::new(Some(dir.path().to_str().unwrap())))
    }

    #[test]
    fn register_overwrites_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(&dir);

        registry.register(Arc::new(NamedTool { name: "dup", category: ToolCategory::Builtin }));
        registry.register(Arc::new(NamedTool { name: "dup", category: ToolCategory::Remote }));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("dup").unwrap().category(), ToolCategory::Remote);
    }

    #[test]
    fn disabled_tool_excluded_from_llm_set() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(&dir);
        registry.register(Arc::new(NamedTool { name: "a", category: ToolCategory::Builtin }));
        registry.register(Arc::new(NamedTool { name: "b", category: ToolCategory::Builtin }));

        registry.set_enabled("U1", "a", false).unwrap();

        let names: Vec<String> = registry
            .enabled_for_llm("U1")
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert!(!names.contains(&"a".to_string()));
        assert!(names.contains(&"b".to_string()));

        // Unaffected user still sees both.
        assert_eq!(registry.enabled_for_llm("U2").len(), 2);
    }

    #[test]
    fn skills_are_hidden_from_llm_set_but_resolvable() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(&dir);
        registry.register(Arc::new(NamedTool { name: "facts_check", category: ToolCategory::Skill }));
        registry.register(Arc::new(NamedTool { name: "facts", category: ToolCategory::Builtin }));

        let names: Vec<String> = registry
            .enabled_for_llm("U1")
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names, vec!["facts".to_string()]);
        assert!(registry.get("facts_check").is_some());
    }

    #[test]
    fn list_filters_by_category() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(&dir);
        registry.register(Arc::new(NamedTool { name: "a", category: ToolCategory::Builtin }));
        registry.register(Arc::new(NamedTool { name: "b", category: ToolCategory::Remote }));

        let remote = registry.list(Some(ToolCategory::Remote), None);
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].name(), "b");
    }

    #[test]
    fn prompt_descriptions_empty_when_all_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(&dir);
        registry.register(Arc::new(NamedTool { name: "a", category: ToolCategory::Builtin }));
        registry.set_enabled("U1", "a", false).unwrap();
        assert_eq!(registry.prompt_descriptions("U1"), "");
    }
}
