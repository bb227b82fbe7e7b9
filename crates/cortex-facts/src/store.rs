use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::FactsError;

/// Closed category set. Unknown inputs fold to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactCategory {
    Personal,
    Preferences,
    Health,
    Work,
    Family,
    Goals,
    Context,
    Other,
}

impl std::fmt::Display for FactCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Personal => "personal",
            Self::Preferences => "preferences",
            Self::Health => "health",
            Self::Work => "work",
            Self::Family => "family",
            Self::Goals => "goals",
            Self::Context => "context",
            Self::Other => "other",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for FactCategory {
    type Err = std::convert::Infallible;

    /// Folds anything unrecognized into `Other` rather than failing —
    /// the LLM supplies this field and gets it wrong routinely.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "personal" => Self::Personal,
            "preferences" => Self::Preferences,
            "health" => Self::Health,
            "work" => Self::Work,
            "family" => Self::Family,
            "goals" => Self::Goals,
            "context" => Self::Context,
            _ => Self::Other,
        })
    }
}

/// A single stored fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub key: String,
    pub value: String,
    pub category: FactCategory,
    pub created_at: String,
    pub last_updated: String,
}

/// Result of a `store` call.
#[derive(Debug, Clone)]
pub struct StoreOutcome {
    pub entry: Fact,
    pub prev_value: Option<String>,
    pub was_update: bool,
}

/// Normalize a fact key to its slug form: trimmed, lowercased,
/// spaces replaced with underscores. `Get` after `Store("My Coffee")`
/// retrieves via `my_coffee`.
pub fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace(' ', "_")
}

/// Per-user persistent fact storage.
///
/// Storage path: `{dir}/.cortex-facts-{user_id}.json`, mode 0600. The file
/// is a JSON object keyed by slug. Every mutation rewrites atomically
/// (temp file + rename). Unreadable files read as empty and are overwritten
/// on the next mutation.
pub struct FactsStore {
    user_id: String,
    path: PathBuf,
}

impl FactsStore {
    /// Open (or lazily create) the store for a user. `storage_dir` defaults
    /// to `$HOME`.
    pub fn new(user_id: &str, storage_dir: Option<&str>) -> Self {
        let dir = storage_dir
            .map(String::from)
            .unwrap_or_else(|| std::env::var("HOME").unwrap_or_else(|_| ".".to_string()));
        let path = PathBuf::from(dir).join(format!(".cortex-facts-{user_id}.json"));
        Self {
            user_id: user_id.to_string(),
            path,
        }
    }

    /// Store or update a fact. Returns the written entry plus the previous
    /// value when this was an update.
    pub fn store(
        &self,
        key: &str,
        value: &str,
        category: FactCategory,
    ) -> Result<StoreOutcome, FactsError> {
        let key = normalize_key(key);
        let now = chrono::Utc::now().to_rfc3339();

        let mut data = self.load();
        let (prev_value, was_update, created_at) = match data.get(&key) {
            Some(existing) => (
                Some(existing.value.clone()),
                true,
                existing.created_at.clone(),
            ),
            None => (None, false, now.clone()),
        };

        let entry = Fact {
            key: key.clone(),
            value: value.to_string(),
            category,
            created_at,
            last_updated: now,
        };
        data.insert(key.clone(), entry.clone());
        self.save(&data)?;

        info!(
            user = %self.user_id,
            key,
            update = was_update,
            "fact stored"
        );

        Ok(StoreOutcome {
            entry,
            prev_value,
            was_update,
        })
    }

    /// Look up a fact by key (normalized before lookup).
    pub fn get(&self, key: &str) -> Option<Fact> {
        self.load().get(&normalize_key(key)).cloned()
    }

    /// All facts, optionally filtered by category, most recently updated
    /// first.
    pub fn list(&self, category: Option<FactCategory>) -> Vec<Fact> {
        let mut facts: Vec<Fact> = self
            .load()
            .into_values()
            .filter(|f| category.map(|c| f.category == c).unwrap_or(true))
            .collect();
        facts.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        facts
    }

    /// Delete a fact. Returns true if it existed.
    pub fn delete(&self, key: &str) -> Result<bool, FactsError> {
        let key = normalize_key(key);
        let mut data = self.load();
        if data.remove(&key).is_some() {
            self.save(&data)?;
            info!(user = %self.user_id, key, "fact deleted");
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Delete every fact for this user. Returns how many were removed.
    pub fn clear_all(&self) -> Result<usize, FactsError> {
        let data = self.load();
        let count = data.len();
        if count > 0 {
            self.save(&BTreeMap::new())?;
            info!(user = %self.user_id, count, "all facts cleared");
        }
        Ok(count)
    }

    /// Number of stored facts.
    pub fn count(&self) -> usize {
        self.load().len()
    }

    /// Render stored facts as a system-prompt block, or empty string when
    /// no facts exist. Most-recently-updated first, capped at `limit`.
    pub fn context_string(&self, limit: usize) -> String {
        let facts = self.list(None);
        if facts.is_empty() {
            return String::new();
        }

        let mut lines = vec!["## Known facts about this user (from FACTS memory):\n".to_string()];
        for fact in facts.iter().take(limit) {
            lines.push(format!("- [{}] {}: {}", fact.category, fact.key, fact.value));
        }
        lines.join("\n")
    }

    fn load(&self) -> BTreeMap<String, Fact> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return BTreeMap::new(),
        };
        match serde_json::from_str(&raw) {
            Ok(data) => data,
            Err(e) => {
                warn!(
                    user = %self.user_id,
                    error = %e,
                    "facts file unreadable, treating as empty"
                );
                BTreeMap::new()
            }
        }
    }

    fn save(&self, data: &BTreeMap<String, Fact>) -> Result<(), FactsError> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string_pretty(data)?)?;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> FactsStore {
        FactsStore::new("U123", Some(dir.path().to_str().unwrap()))
    }

    #[test]
    fn store_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let out = store
            .store("preferred_coffee", "oat milk flat white", FactCategory::Preferences)
            .unwrap();
        assert!(!out.was_update);
        assert!(out.prev_value.is_none());

        let fact = store.get("preferred_coffee").unwrap();
        assert_eq!(fact.value, "oat milk flat white");
        assert_eq!(fact.category, FactCategory::Preferences);
    }

    #[test]
    fn key_normalization_is_lossless_for_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.store("My Coffee", "espresso", FactCategory::Other).unwrap();
        assert_eq!(store.get("my_coffee").unwrap().value, "espresso");
        assert_eq!(store.get("  My Coffee ").unwrap().value, "espresso");
    }

    #[test]
    fn update_reports_previous_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.store("k", "v1", FactCategory::Other).unwrap();
        let out = store.store("k", "v2", FactCategory::Other).unwrap();
        assert!(out.was_update);
        assert_eq!(out.prev_value.as_deref(), Some("v1"));
        assert_eq!(store.get("k").unwrap().value, "v2");
    }

    #[test]
    fn unknown_category_folds_to_other() {
        let cat: FactCategory = "nonsense".parse().unwrap();
        assert_eq!(cat, FactCategory::Other);
        let cat: FactCategory = "health".parse().unwrap();
        assert_eq!(cat, FactCategory::Health);
    }

    #[test]
    fn list_orders_by_last_updated_desc() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.store("a", "1", FactCategory::Other).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.store("b", "2", FactCategory::Other).unwrap();

        let facts = store.list(None);
        assert_eq!(facts[0].key, "b");
        assert_eq!(facts[1].key, "a");
    }

    #[test]
    fn list_filters_by_category() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.store("a", "1", FactCategory::Health).unwrap();
        store.store("b", "2", FactCategory::Work).unwrap();

        let facts = store.list(Some(FactCategory::Health));
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].key, "a");
    }

    #[test]
    fn context_string_empty_without_facts() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.context_string(20), "");
    }

    #[test]
    fn context_string_lists_facts_with_categories() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .store("coffee", "oat milk flat white", FactCategory::Preferences)
            .unwrap();

        let ctx = store.context_string(20);
        assert!(ctx.contains("Known facts about this user"));
        assert!(ctx.contains("- [preferences] coffee: oat milk flat white"));
    }

    #[test]
    fn clear_all_reports_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.store("a", "1", FactCategory::Other).unwrap();
        store.store("b", "2", FactCategory::Other).unwrap();

        assert_eq!(store.clear_all().unwrap(), 2);
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn corrupt_file_reads_as_empty_and_recovers_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(&store.path, "{not json").unwrap();

        assert_eq!(store.count(), 0);
        store.store("k", "v", FactCategory::Other).unwrap();
        assert_eq!(store.get("k").unwrap().value, "v");
    }

    #[test]
    fn file_mode_is_0600() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.store("k", "v", FactCategory::Other).unwrap();

        let mode = std::fs::metadata(&store.path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
