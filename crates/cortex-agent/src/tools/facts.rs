use async_trait::async_trait;

use cortex_facts::{FactCategory, FactsStore};
use cortex_tool::{Tool, ToolResult};

/// LLM-driven CRUD over the per-user facts store.
///
/// Operations: store, get, list, delete. The executor supplies the
/// requesting user id; each call opens that user's store.
pub struct FactsTool {
    storage_dir: Option<String>,
}

impl FactsTool {
    pub fn new(storage_dir: Option<String>) -> Self {
        Self { storage_dir }
    }

    fn store_for(&self, user_id: &str) -> FactsStore {
        FactsStore::new(user_id, self.storage_dir.as_deref())
    }
}

#[async_trait]
impl Tool for FactsTool {
    fn name(&self) -> &str {
        "facts"
    }

    fn display_name(&self) -> &str {
        "FACTS Memory"
    }

    fn description(&self) -> &str {
        "Store and retrieve persistent facts about the user. Use to remember \
         preferences, personal details, contacts, goals. Operations: \
         store (save a fact), get (retrieve one fact), list (show all facts), \
         delete (remove a fact)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "description": "The operation to perform",
                    "enum": ["store", "get", "list", "delete"]
                },
                "key": {
                    "type": "string",
                    "description": "Descriptive slug key (e.g. 'preferred_coffee', 'spouse_name')"
                },
                "value": {
                    "type": "string",
                    "description": "The fact value (required for 'store')"
                },
                "category": {
                    "type": "string",
                    "description": "Fact category",
                    "enum": ["personal", "preferences", "health", "work", "family", "goals", "context", "other"]
                }
            },
            "required": ["operation"]
        })
    }

    async fn execute(&self, args: serde_json::Value, user_id: &str) -> ToolResult {
        if user_id.is_empty() {
            return ToolResult::error(self.name(), "user id not set");
        }

        let operation = args.get("operation").and_then(|v| v.as_str()).unwrap_or("");
        let key = args.get("key").and_then(|v| v.as_str()).unwrap_or("");
        let value = args.get("value").and_then(|v| v.as_str()).unwrap_or("");
        let category: FactCategory = args
            .get("category")
            .and_then(|v| v.as_str())
            .unwrap_or("other")
            .parse()
            .unwrap_or(FactCategory::Other);

        let store = self.store_for(user_id);

        match operation {
            "store" => {
                if key.is_empty() || value.is_empty() {
                    return ToolResult::error(self.name(), "'store' requires both 'key' and 'value'");
                }
                match store.store(key, value, category) {
                    Ok(outcome) => {
                        let mut content =
                            format!("Stored fact: {} = {} [{}]", outcome.entry.key, value, category);
                        if outcome.was_update
                            && outcome.prev_value.as_deref() != Some(value)
                        {
                            content.push_str(&format!(
                                "\nNote: updated from previous value: '{}'",
                                outcome.prev_value.as_deref().unwrap_or("")
                            ));
                        }
                        ToolResult::success(self.name(), content)
                            .with_raw(serde_json::to_value(&outcome.entry).unwrap_or_default())
                    }
                    Err(e) => ToolResult::error(self.name(), e.to_string()),
                }
            }
            "get" => {
                if key.is_empty() {
                    return ToolResult::error(self.name(), "'get' requires 'key'");
                }
                match store.get(key) {
                    Some(fact) => ToolResult::success(
                        self.name(),
                        format!("{}: {} [{}]", fact.key, fact.value, fact.category),
                    )
                    .with_raw(serde_json::to_value(&fact).unwrap_or_default()),
                    None => {
                        ToolResult::success(self.name(), format!("No fact found with key: {key}"))
                    }
                }
            }
            "list" => {
                let facts = store.list(None);
                if facts.is_empty() {
                    return ToolResult::success(self.name(), "No facts stored yet.");
                }
                let mut lines = vec![format!("Stored facts ({} total):", facts.len())];
                for fact in &facts {
                    lines.push(format!("- [{}] {}: {}", fact.category, fact.key, fact.value));
                }
                ToolResult::success(self.name(), lines.join("\n"))
                    .with_raw(serde_json::to_value(&facts).unwrap_or_default())
            }
            "delete" => {
                if key.is_empty() {
                    return ToolResult::error(self.name(), "'delete' requires 'key'");
                }
                match store.delete(key) {
                    Ok(true) => ToolResult::success(self.name(), format!("Deleted fact: {key}")),
                    Ok(false) => {
                        ToolResult::success(self.name(), format!("No fact found with key: {key}"))
                    }
                    Err(e) => ToolResult::error(self.name(), e.to_string()),
                }
            }
            other => ToolResult::error(
                self.name(),
                format!("unknown operation: {other}. Use: store, get, list, delete"),
            ),
        }
    }
}

/// Does this message likely reference personal context (and so warrant
/// FACTS injection)? A keyword test over personal pronouns and
/// fact-category vocabulary.
pub fn message_references_personal_context(text: &str) -> bool {
    let text_lower = format!(" {} ", text.to_lowercase());

    const PRONOUNS: &[&str] = &[
        " i ", " my ", " me ", " mine ", " i'm ", " i've ", " i'd ", " myself ",
    ];
    if PRONOUNS.iter().any(|p| text_lower.contains(p)) {
        return true;
    }

    const CATEGORY_KEYWORDS: &[&str] = &[
        "prefer", "favorite", "favourite", "allergic", "wife", "husband", "spouse", "partner",
        "kid", "child", "son", "daughter", "work", "job", "project", "goal", "plan", "health",
        "doctor", "medicine", "diet", "remember", "recall", "you know",
        "what do you know about me",
    ];
    CATEGORY_KEYWORDS.iter().any(|kw| text_lower.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_in(dir: &tempfile::TempDir) -> FactsTool {
        FactsTool::new(Some(dir.path().to_str().unwrap().to_string()))
    }

    #[tokio::test]
    async fn store_then_get_roundtrips_through_tool() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool_in(&dir);

        let result = tool
            .execute(
                serde_json::json!({
                    "operation": "store",
                    "key": "preferred_coffee",
                    "value": "oat milk flat white",
                    "category": "preferences"
                }),
                "U1",
            )
            .await;
        assert!(result.success);
        assert!(result.content.contains("oat milk flat white"));

        let result = tool
            .execute(
                serde_json::json!({"operation": "get", "key": "Preferred Coffee"}),
                "U1",
            )
            .await;
        assert!(result.success);
        assert!(result.content.contains("oat milk flat white"));
    }

    #[tokio::test]
    async fn store_without_value_errors() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool_in(&dir);
        let result = tool
            .execute(serde_json::json!({"operation": "store", "key": "k"}), "U1")
            .await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn list_is_empty_friendly() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool_in(&dir);
        let result = tool.execute(serde_json::json!({"operation": "list"}), "U1").await;
        assert!(result.success);
        assert!(result.content.contains("No facts stored yet"));
    }

    #[tokio::test]
    async fn unknown_operation_errors() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool_in(&dir);
        let result = tool.execute(serde_json::json!({"operation": "zap"}), "U1").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("unknown operation"));
    }

    #[test]
    fn personal_context_predicate() {
        assert!(message_references_personal_context("what do you know about my coffee?"));
        assert!(message_references_personal_context("I am allergic to peanuts"));
        assert!(message_references_personal_context("the doctor said to rest"));
        assert!(!message_references_personal_context("the weather is nice"));
    }
}
