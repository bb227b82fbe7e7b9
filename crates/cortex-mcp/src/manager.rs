use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use cortex_secrets::{resolve_ref, SecretStore};
use cortex_tool::ToolRegistry;

use crate::adapter::McpToolAdapter;
use crate::config::{load_config, ToolServerConfig, Transport};
use crate::error::McpError;
use crate::{PipeClient, ServerClient, SseClient};

/// Status row for the management UI.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub enabled: bool,
    pub connected: bool,
    pub transport: Transport,
    pub tool_names: Vec<String>,
    pub description: String,
}

/// Lifecycle manager for all configured tool servers.
///
/// Owns the transports; the registry owns no clients and is only told to
/// register/unregister tools on connect/disconnect. Connection failures at
/// startup are logged per server and never abort the others.
pub struct McpManager {
    registry: Arc<ToolRegistry>,
    secrets: Arc<dyn SecretStore>,
    base_path: PathBuf,
    local_path: Option<PathBuf>,
    configs: BTreeMap<String, ToolServerConfig>,
    clients: HashMap<String, Arc<Mutex<ServerClient>>>,
    tool_names: HashMap<String, Vec<String>>,
}

impl McpManager {
    pub fn new(
        registry: Arc<ToolRegistry>,
        secrets: Arc<dyn SecretStore>,
        base_path: impl Into<PathBuf>,
        local_path: Option<PathBuf>,
    ) -> Self {
        Self {
            registry,
            secrets,
            base_path: base_path.into(),
            local_path,
            configs: BTreeMap::new(),
            clients: HashMap::new(),
            tool_names: HashMap::new(),
        }
    }

    /// Load configs and connect every enabled server.
    pub async fn startup(&mut self) {
        self.configs = load_config(&self.base_path, self.local_path.as_deref());
        if self.configs.is_empty() {
            info!("no tool servers configured");
            return;
        }
        info!(count = self.configs.len(), "loaded tool-server configs");

        let names: Vec<String> = self
            .configs
            .iter()
            .filter(|(_, c)| c.enabled)
            .map(|(n, _)| n.clone())
            .collect();
        for name in names {
            if let Err(e) = self.connect_server(&name).await {
                error!(server = %name, error = %e, "failed to start tool server");
            }
        }
    }

    /// Disconnect every server and unregister its tools.
    pub async fn shutdown(&mut self) {
        let names: Vec<String> = self.clients.keys().cloned().collect();
        for name in names {
            self.disconnect_server(&name).await;
        }
    }

    /// Connect one server and register its tools. Reconnecting an already
    /// connected server tears the old connection down first, so re-listed
    /// tools overwrite their previous registrations.
    pub async fn connect_server(&mut self, name: &str) -> Result<(), McpError> {
        let config = self
            .configs
            .get(name)
            .cloned()
            .ok_or_else(|| McpError::Connection(format!("no config for tool server '{name}'")))?;

        match config.transport {
            Transport::Pipe if config.command.is_empty() => {
                return Err(McpError::Connection(format!(
                    "tool server '{name}' has no command configured"
                )));
            }
            Transport::HttpSse if config.url.is_empty() => {
                return Err(McpError::Connection(format!(
                    "tool server '{name}' has no url configured"
                )));
            }
            _ => {}
        }

        if self.clients.contains_key(name) {
            self.disconnect_server(name).await;
        }

        let env = self.resolve_values(&config.env).await;
        let headers = self.resolve_values(&config.headers).await;

        let mut client = match config.transport {
            Transport::Pipe => {
                ServerClient::Pipe(PipeClient::new(&config.command, config.args.clone(), env))
            }
            Transport::HttpSse => ServerClient::HttpSse(SseClient::new(&config.url, headers)?),
        };

        client.connect().await?;

        let tools = match client.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                // Keep the connection; tools can be listed on reconnect.
                error!(server = name, error = %e, "failed to list tools");
                Vec::new()
            }
        };

        let handle = Arc::new(Mutex::new(client));
        self.clients.insert(name.to_string(), handle.clone());

        let mut registered = Vec::new();
        for tool in tools {
            if tool.name.is_empty() {
                warn!(server = name, "skipping tool with empty name");
                continue;
            }
            let adapter = McpToolAdapter::new(
                name,
                &tool.name,
                &tool.description,
                tool.input_schema,
                handle.clone(),
            );
            let adapter_name = cortex_tool::Tool::name(&adapter).to_string();
            self.registry.register(Arc::new(adapter));
            registered.push(adapter_name);
        }
        info!(server = name, tools = registered.len(), "tool server connected");
        self.tool_names.insert(name.to_string(), registered);
        Ok(())
    }

    /// Disconnect one server, unregistering its tools first.
    pub async fn disconnect_server(&mut self, name: &str) {
        for tool_name in self.tool_names.remove(name).unwrap_or_default() {
            self.registry.unregister(&tool_name);
        }
        if let Some(handle) = self.clients.remove(name) {
            handle.lock().await.disconnect().await;
        }
        info!(server = name, "tool server disconnected");
    }

    pub async fn reconnect_server(&mut self, name: &str) -> Result<(), McpError> {
        self.disconnect_server(name).await;
        self.connect_server(name).await
    }

    /// Status of every configured server.
    pub async fn status(&self) -> Vec<ServerStatus> {
        let mut out = Vec::new();
        for (name, config) in &self.configs {
            let connected = match self.clients.get(name) {
                Some(handle) => handle.lock().await.connected(),
                None => false,
            };
            out.push(ServerStatus {
                name: name.clone(),
                enabled: config.enabled,
                connected,
                transport: config.transport,
                tool_names: self.tool_names.get(name).cloned().unwrap_or_default(),
                description: config.description.clone(),
            });
        }
        out
    }

    /// Resolve `secret:NAME` references in a value map. Failed lookups drop
    /// the key with an error log; plain values pass through.
    async fn resolve_values(&self, values: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut resolved = BTreeMap::new();
        for (key, value) in values {
            match resolve_ref(self.secrets.as_ref(), value).await {
                Ok(resolved_value) => {
                    if cortex_secrets::is_secret_ref(value) {
                        debug!(key, "resolved secret reference");
                    }
                    resolved.insert(key.clone(), resolved_value);
                }
                Err(e) => {
                    error!(key, error = %e, "failed to resolve secret reference, dropping value");
                }
            }
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_secrets::EnvSecretStore;
    use cortex_tool::ToolStateStore;

    fn fixture(dir: &tempfile::TempDir, servers: serde_json::Value) -> McpManager {
        let base = dir.path().join("tool_servers.json");
        std::fs::write(&base, serde_json::json!({ "servers": servers }).to_string()).unwrap();
        let registry = Arc::new(ToolRegistry::new(ToolStateStore::new(Some(
            dir.path().to_str().unwrap(),
        ))));
        McpManager::new(registry, Arc::new(EnvSecretStore), base, None)
    }

    const FAKE_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fake","version":"0.1"}}}\n' "$id"
      ;;
    *'"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"ping","description":"pong","inputSchema":{"type":"object","properties":{}}}]}}\n' "$id"
      ;;
    *'"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pong"}]}}\n' "$id"
      ;;
  esac
done
"#;

    #[tokio::test]
    async fn startup_registers_tools_and_shutdown_removes_them() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = fixture(
            &dir,
            serde_json::json!({
                "fake": {
                    "transport": "pipe",
                    "command": "sh",
                    "args": ["-c", FAKE_SERVER],
                    "enabled": true
                }
            }),
        );

        manager.startup().await;
        assert!(manager.registry.get("mcp_fake_ping").is_some());

        let status = manager.status().await;
        assert_eq!(status.len(), 1);
        assert!(status[0].connected);
        assert_eq!(status[0].tool_names, vec!["mcp_fake_ping"]);

        manager.shutdown().await;
        assert!(manager.registry.get("mcp_fake_ping").is_none());
    }

    #[tokio::test]
    async fn reconnect_reregisters_tools() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = fixture(
            &dir,
            serde_json::json!({
                "fake": {
                    "transport": "pipe",
                    "command": "sh",
                    "args": ["-c", FAKE_SERVER],
                    "enabled": true
                }
            }),
        );
        manager.startup().await;
        manager.reconnect_server("fake").await.unwrap();
        assert!(manager.registry.get("mcp_fake_ping").is_some());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn disabled_servers_are_not_connected() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = fixture(
            &dir,
            serde_json::json!({
                "off": {"transport": "pipe", "command": "sh", "enabled": false}
            }),
        );
        manager.startup().await;
        let status = manager.status().await;
        assert_eq!(status.len(), 1);
        assert!(!status[0].connected);
    }

    #[tokio::test]
    async fn pipe_without_command_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = fixture(
            &dir,
            serde_json::json!({
                "broken": {"transport": "pipe", "enabled": true}
            }),
        );
        manager.configs = load_config(&manager.base_path, None);
        let err = manager.connect_server("broken").await.unwrap_err();
        assert!(err.to_string().contains("no command"));
    }

    #[tokio::test]
    async fn secret_refs_resolve_from_env() {
        std::env::set_var("CORTEX_MCP_TEST_TOKEN", "tok-123");
        let dir = tempfile::tempdir().unwrap();
        let manager = fixture(&dir, serde_json::json!({}));

        let mut values = BTreeMap::new();
        values.insert("TOKEN".to_string(), "secret:CORTEX_MCP_TEST_TOKEN".to_string());
        values.insert("PLAIN".to_string(), "as-is".to_string());
        values.insert("MISSING".to_string(), "secret:CORTEX_MCP_TEST_ABSENT".to_string());

        let resolved = manager.resolve_values(&values).await;
        assert_eq!(resolved.get("TOKEN").map(String::as_str), Some("tok-123"));
        assert_eq!(resolved.get("PLAIN").map(String::as_str), Some("as-is"));
        assert!(!resolved.contains_key("MISSING"));
        std::env::remove_var("CORTEX_MCP_TEST_TOKEN");
    }
}
