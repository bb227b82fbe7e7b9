use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::{debug, info, warn};

use crate::error::McpError;
use crate::{
    initialize_params, parse_call_result, ContentBlock, McpToolInfo, CONNECT_TIMEOUT,
    REQUEST_TIMEOUT,
};

/// How long to wait for a clean exit after closing stdin.
const GRACEFUL_EXIT_TIMEOUT: Duration = Duration::from_secs(5);
/// How long to wait after sending the kill signal.
const KILL_TIMEOUT: Duration = Duration::from_secs(3);

/// JSON-RPC client over a subprocess pipe.
///
/// Spawns the server, writes newline-delimited JSON to its stdin, and reads
/// newline-delimited JSON from its stdout. Requests are serial; the owning
/// manager wraps the client in a mutex so calls never interleave.
pub struct PipeClient {
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    request_id: u64,
    connected: bool,
    server_info: serde_json::Value,
}

impl PipeClient {
    pub fn new(command: &str, args: Vec<String>, env: BTreeMap<String, String>) -> Self {
        Self {
            command: command.to_string(),
            args,
            env,
            child: None,
            stdin: None,
            stdout: None,
            request_id: 0,
            connected: false,
            server_info: serde_json::Value::Null,
        }
    }

    pub fn connected(&self) -> bool {
        self.connected && self.child.is_some()
    }

    pub fn server_info(&self) -> &serde_json::Value {
        &self.server_info
    }

    /// Spawn the server process and run the initialize handshake.
    pub async fn connect(&mut self) -> Result<(), McpError> {
        if self.connected() {
            warn!(command = %self.command, "pipe client already connected");
            return Ok(());
        }

        let mut child = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::Connection(format!("failed to spawn {}: {e}", self.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Connection("no stdin pipe".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Connection("no stdout pipe".to_string()))?;

        info!(
            command = %self.command,
            pid = child.id().unwrap_or(0),
            "tool server started"
        );

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stdout = Some(BufReader::new(stdout));

        let init = match self
            .send_request("initialize", initialize_params(), CONNECT_TIMEOUT)
            .await
        {
            Ok(init) => init,
            Err(e) => {
                self.cleanup().await;
                return Err(e);
            }
        };
        self.server_info = init.get("serverInfo").cloned().unwrap_or_default();

        if let Err(e) = self.send_notification("notifications/initialized").await {
            self.cleanup().await;
            return Err(e);
        }

        self.connected = true;
        info!(
            server = %self.server_info.get("name").and_then(|n| n.as_str()).unwrap_or("unknown"),
            "tool server initialized"
        );
        Ok(())
    }

    /// Shut the server down: close stdin, give it 5 s to exit, then kill
    /// and wait up to 3 s more.
    pub async fn disconnect(&mut self) {
        self.connected = false;
        self.stdin.take();
        self.stdout.take();

        let Some(mut child) = self.child.take() else {
            return;
        };

        if tokio::time::timeout(GRACEFUL_EXIT_TIMEOUT, child.wait())
            .await
            .is_ok()
        {
            info!(command = %self.command, "tool server exited");
            return;
        }

        warn!(command = %self.command, "tool server did not exit, killing");
        let _ = child.start_kill();
        if tokio::time::timeout(KILL_TIMEOUT, child.wait()).await.is_err() {
            warn!(command = %self.command, "tool server did not die after kill");
        }
    }

    pub async fn list_tools(&mut self) -> Result<Vec<McpToolInfo>, McpError> {
        self.ensure_connected()?;
        let result = self
            .send_request("tools/list", serde_json::json!({}), REQUEST_TIMEOUT)
            .await?;
        let tools: Vec<McpToolInfo> = serde_json::from_value(
            result.get("tools").cloned().unwrap_or_else(|| serde_json::json!([])),
        )
        .map_err(|e| McpError::Connection(format!("invalid tools/list response: {e}")))?;
        info!(command = %self.command, count = tools.len(), "tool server listed tools");
        Ok(tools)
    }

    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<Vec<ContentBlock>, McpError> {
        self.ensure_connected()?;
        let result = self
            .send_request(
                "tools/call",
                serde_json::json!({ "name": name, "arguments": arguments }),
                REQUEST_TIMEOUT,
            )
            .await?;
        parse_call_result(result, name)
    }

    fn ensure_connected(&self) -> Result<(), McpError> {
        if self.connected() {
            Ok(())
        } else {
            Err(McpError::Connection("pipe client not connected".to_string()))
        }
    }

    async fn send_request(
        &mut self,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, McpError> {
        self.request_id += 1;
        let id = self.request_id;
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        self.write_line(&request).await?;
        debug!(method, id, "mcp → request");

        let response = tokio::time::timeout(timeout, self.read_response(id))
            .await
            .map_err(|_| {
                // A timed-out request leaves the stream in an unknown state;
                // the manager reconnects the server before reuse.
                self.connected = false;
                McpError::Timeout(method.to_string())
            })??;

        if let Some(error) = response.get("error") {
            let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(-1);
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string();
            return Err(McpError::Rpc { code, message });
        }

        Ok(response.get("result").cloned().unwrap_or_default())
    }

    async fn send_notification(&mut self, method: &str) -> Result<(), McpError> {
        let notification = serde_json::json!({ "jsonrpc": "2.0", "method": method });
        self.write_line(&notification).await
    }

    async fn write_line(&mut self, message: &serde_json::Value) -> Result<(), McpError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| McpError::Connection("no stdin available".to_string()))?;
        let mut line = message.to_string();
        line.push('\n');
        let written = stdin.write_all(line.as_bytes()).await;
        let flushed = stdin.flush().await;
        if let Err(e) = written.and(flushed) {
            // Any pipe I/O failure transitions to disconnected; the manager
            // is responsible for reconnecting.
            self.connected = false;
            return Err(McpError::Connection(format!("write failed: {e}")));
        }
        Ok(())
    }

    /// Read until the response with the expected id appears. Notifications
    /// and invalid lines are skipped; responses for other ids are logged —
    /// they should not occur in serial-request mode.
    async fn read_response(&mut self, request_id: u64) -> Result<serde_json::Value, McpError> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| McpError::Connection("no stdout available".to_string()))?;

        let mut line = String::new();
        loop {
            line.clear();
            let n = stdout
                .read_line(&mut line)
                .await
                .map_err(|e| McpError::Connection(format!("read failed: {e}")))?;
            if n == 0 {
                self.connected = false;
                return Err(McpError::Connection("tool server closed stdout".to_string()));
            }

            let message: serde_json::Value = match serde_json::from_str(line.trim()) {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "invalid JSON line from tool server");
                    continue;
                }
            };

            match message.get("id").and_then(|i| i.as_u64()) {
                None => {
                    debug!(
                        method = message.get("method").and_then(|m| m.as_str()).unwrap_or("?"),
                        "mcp ← notification"
                    );
                }
                Some(id) if id == request_id => {
                    debug!(id, "mcp ← response");
                    return Ok(message);
                }
                Some(id) => {
                    warn!(got = id, expected = request_id, "response for unexpected request id");
                }
            }
        }
    }

    async fn cleanup(&mut self) {
        self.connected = false;
        self.stdin.take();
        self.stdout.take();
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}
