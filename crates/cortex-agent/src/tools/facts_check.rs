use async_trait::async_trait;

use cortex_facts::FactsStore;
use cortex_tool::{Tool, ToolCategory, ToolResult};

/// Skill reminding the model which facts exist for the current user.
///
/// Skills are LLM-callable but hidden from user-facing enable/disable
/// surfaces; the model calls this before answering personal questions to
/// avoid inventing preferences the user never stated.
pub struct FactsCheckSkill {
    storage_dir: Option<String>,
}

impl FactsCheckSkill {
    pub fn new(storage_dir: Option<String>) -> Self {
        Self { storage_dir }
    }
}

#[async_trait]
impl Tool for FactsCheckSkill {
    fn name(&self) -> &str {
        "facts_check"
    }

    fn display_name(&self) -> &str {
        "Facts Check"
    }

    fn description(&self) -> &str {
        "Check what is actually stored in FACTS memory for this user before \
         answering questions about their preferences or personal details. \
         Never guess a personal detail that is not stored."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Skill
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _args: serde_json::Value, user_id: &str) -> ToolResult {
        if user_id.is_empty() {
            return ToolResult::error(self.name(), "user id not set");
        }

        let store = FactsStore::new(user_id, self.storage_dir.as_deref());
        let context = store.context_string(20);
        if context.is_empty() {
            return ToolResult::success(
                self.name(),
                "No facts are stored for this user. Do not invent personal details; \
                 ask the user instead.",
            );
        }
        ToolResult::success(self.name(), context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_facts::FactCategory;

    #[tokio::test]
    async fn reports_absence_and_presence() {
        let dir = tempfile::tempdir().unwrap();
        let storage = dir.path().to_str().unwrap().to_string();
        let skill = FactsCheckSkill::new(Some(storage.clone()));

        let result = skill.execute(serde_json::json!({}), "U1").await;
        assert!(result.content.contains("No facts are stored"));

        FactsStore::new("U1", Some(&storage))
            .store("coffee", "flat white", FactCategory::Preferences)
            .unwrap();
        let result = skill.execute(serde_json::json!({}), "U1").await;
        assert!(result.content.contains("flat white"));
    }

    #[test]
    fn is_a_skill() {
        let skill = FactsCheckSkill::new(None);
        assert_eq!(skill.category(), ToolCategory::Skill);
    }
}
