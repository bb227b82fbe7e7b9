use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use cortex_secrets::is_secret_ref;

/// Tool-server transport. Closed set: each server speaks exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
    #[default]
    Pipe,
    HttpSse,
}

/// Configuration for a single tool server.
///
/// `env` and `headers` values may be `secret:NAME` references, resolved by
/// the manager at connect time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub transport: Transport,
    /// Pipe transport: executable plus arguments.
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// HTTP transport: server base URL.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
}

impl ToolServerConfig {
    /// True when any env or header value is a `secret:NAME` reference.
    pub fn has_secret_refs(&self) -> bool {
        self.env.values().chain(self.headers.values()).any(|v| is_secret_ref(v))
    }
}

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    servers: BTreeMap<String, ToolServerConfig>,
}

/// Load tool-server configs: the git-tracked base file overlaid by the
/// machine-specific `.local.json` (gitignored). Local entries replace base
/// entries of the same name wholesale.
pub fn load_config(base_path: &Path, local_path: Option<&Path>) -> BTreeMap<String, ToolServerConfig> {
    let derived_local = base_path.with_extension("").with_extension("local.json");
    let local_path = local_path.unwrap_or(&derived_local);

    let mut merged = read_file(base_path);
    for (name, config) in read_file(local_path) {
        merged.insert(name, config);
    }

    // Backfill the map key into each config's name field.
    for (name, config) in merged.iter_mut() {
        config.name = name.clone();
    }
    merged
}

fn read_file(path: &Path) -> BTreeMap<String, ToolServerConfig> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return BTreeMap::new(),
    };
    match serde_json::from_str::<ConfigFile>(&raw) {
        Ok(file) => file.servers,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse tool-server config");
            BTreeMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_overlay_wins_per_server() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("tool_servers.json");
        let local = dir.path().join("tool_servers.local.json");

        std::fs::write(
            &base,
            serde_json::json!({
                "servers": {
                    "github": {"transport": "pipe", "command": "npx", "enabled": false},
                    "kb": {"transport": "http-sse", "url": "http://kb.local:8080/mcp", "enabled": true}
                }
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(
            &local,
            serde_json::json!({
                "servers": {
                    "github": {"transport": "pipe", "command": "npx", "args": ["-y", "server-github"], "enabled": true}
                }
            })
            .to_string(),
        )
        .unwrap();

        let configs = load_config(&base, Some(&local));
        assert_eq!(configs.len(), 2);
        let github = &configs["github"];
        assert!(github.enabled);
        assert_eq!(github.args, vec!["-y", "server-github"]);
        assert_eq!(github.name, "github");
        assert_eq!(configs["kb"].transport, Transport::HttpSse);
    }

    #[test]
    fn missing_files_yield_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let configs = load_config(&dir.path().join("nope.json"), None);
        assert!(configs.is_empty());
    }

    #[test]
    fn transport_serde_uses_kebab_case() {
        let t: Transport = serde_json::from_str("\"http-sse\"").unwrap();
        assert_eq!(t, Transport::HttpSse);
        assert_eq!(serde_json::to_string(&Transport::Pipe).unwrap(), "\"pipe\"");
    }

    #[test]
    fn secret_ref_detection() {
        let mut config: ToolServerConfig =
            serde_json::from_value(serde_json::json!({"transport": "pipe", "command": "x"}))
                .unwrap();
        assert!(!config.has_secret_refs());
        config
            .env
            .insert("GITHUB_TOKEN".into(), "secret:GITHUB_TOKEN".into());
        assert!(config.has_secret_refs());
    }
}
