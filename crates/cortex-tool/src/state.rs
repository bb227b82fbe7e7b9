use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use tracing::{info, warn};

type StateMap = BTreeMap<String, BTreeMap<String, bool>>;

/// Per-user tool enable/disable state, persisted to
/// `~/.cortex-tool-state.json` (0600).
///
/// Schema: `{ user_id: { tool_name: bool } }`. Absent entries default to
/// enabled. Mutations rewrite the whole file atomically.
pub struct ToolStateStore {
    path: PathBuf,
}

impl ToolStateStore {
    pub fn new(storage_dir: Option<&str>) -> Self {
        let dir = storage_dir
            .map(String::from)
            .unwrap_or_else(|| std::env::var("HOME").unwrap_or_else(|_| ".".to_string()));
        Self {
            path: PathBuf::from(dir).join(".cortex-tool-state.json"),
        }
    }

    /// Default: every tool is enabled.
    pub fn is_enabled(&self, user_id: &str, tool_name: &str) -> bool {
        self.load()
            .get(user_id)
            .and_then(|m| m.get(tool_name))
            .copied()
            .unwrap_or(true)
    }

    pub fn set_enabled(&self, user_id: &str, tool_name: &str, enabled: bool) -> std::io::Result<()> {
        let mut data = self.load();
        data.entry(user_id.to_string())
            .or_default()
            .insert(tool_name.to_string(), enabled);
        self.save(&data)?;
        info!(
            user = user_id,
            tool = tool_name,
            enabled,
            "tool state updated"
        );
        Ok(())
    }

    /// All explicit tool states for a user.
    pub fn user_state(&self, user_id: &str) -> BTreeMap<String, bool> {
        self.load().get(user_id).cloned().unwrap_or_default()
    }

    /// Reset a user back to defaults (everything enabled).
    pub fn clear_user(&self, user_id: &str) -> std::io::Result<()> {
        let mut data = self.load();
        if data.remove(user_id).is_some() {
            self.save(&data)?;
        }
        Ok(())
    }

    fn load(&self) -> StateMap {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return StateMap::new(),
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(error = %e, "tool state file unreadable, treating as empty");
            StateMap::new()
        })
    }

    fn save(&self, data: &StateMap) -> std::io::Result<()> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string_pretty(data)?)?;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
