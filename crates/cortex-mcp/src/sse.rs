use std::collections::BTreeMap;

use futures_util::StreamExt;
use tracing::{debug, info, warn};

use crate::error::McpError;
use crate::{
    initialize_params, parse_call_result, ContentBlock, McpToolInfo, CONNECT_TIMEOUT,
    REQUEST_TIMEOUT,
};

/// JSON-RPC client over HTTP with SSE endpoint discovery.
///
/// The server advertises its POST endpoint on a `GET {url}/sse` event
/// stream; when discovery fails, `{url}/message` is assumed. Thereafter
/// every request is a plain JSON POST whose HTTP body is the response.
/// Notifications are fire-and-forget POSTs.
pub struct SseClient {
    client: reqwest::Client,
    base_url: String,
    message_endpoint: Option<String>,
    request_id: u64,
    connected: bool,
    server_info: serde_json::Value,
}

impl SseClient {
    pub fn new(url: &str, headers: BTreeMap<String, String>) -> Result<Self, McpError> {
        let mut header_map = reqwest::header::HeaderMap::new();
        for (key, value) in &headers {
            let name: reqwest::header::HeaderName = key
                .parse()
                .map_err(|_| McpError::Connection(format!("invalid header name: {key}")))?;
            let value = value
                .parse()
                .map_err(|_| McpError::Connection(format!("invalid header value for {key}")))?;
            header_map.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .build()
            .map_err(|e| McpError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            message_endpoint: None,
            request_id: 0,
            connected: false,
            server_info: serde_json::Value::Null,
        })
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn server_info(&self) -> &serde_json::Value {
        &self.server_info
    }

    /// Discover the message endpoint and run the initialize handshake.
    pub async fn connect(&mut self) -> Result<(), McpError> {
        if self.connected {
            warn!(url = %self.base_url, "SSE client already connected");
            return Ok(());
        }

        self.message_endpoint = Some(self.discover_endpoint().await);

        let init = self
            .send_request("initialize", initialize_params(), CONNECT_TIMEOUT)
            .await?;
        self.server_info = init.get("serverInfo").cloned().unwrap_or_default();
        self.send_notification("notifications/initialized").await;

        self.connected = true;
        info!(
            url = %self.base_url,
            server = %self.server_info.get("name").and_then(|n| n.as_str()).unwrap_or("unknown"),
            "SSE tool server initialized"
        );
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        self.connected = false;
        self.message_endpoint = None;
        info!(url = %self.base_url, "SSE tool server disconnected");
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
        info!(url = %self.base_url, count = tools.len(), "SSE tool server listed tools");
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
        if self.connected {
            Ok(())
        } else {
            Err(McpError::Connection("SSE client not connected".to_string()))
        }
    }

    /// Read `{url}/sse` until an endpoint is advertised; fall back to
    /// `{url}/message` on any failure or timeout.
    async fn discover_endpoint(&self) -> String {
        let fallback = format!("{}/message", self.base_url);
        let sse_url = format!("{}/sse", self.base_url);

        let discovery = async {
            let resp = self.client.get(&sse_url).send().await.ok()?;
            if !resp.status().is_success() {
                debug!(status = resp.status().as_u16(), "SSE endpoint unavailable");
                return None;
            }

            let mut stream = resp.bytes_stream();
            let mut buffer = String::new();
            let mut endpoint_event_seen = false;

            while let Some(chunk) = stream.next().await {
                let chunk = chunk.ok()?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    if line.starts_with("event:") {
                        endpoint_event_seen = line[6..].trim() == "endpoint";
                        continue;
                    }
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    // Accept either a labeled endpoint event or a bare data
                    // line that looks like a URL/path.
                    if endpoint_event_seen || data.starts_with('/') || data.starts_with("http") {
                        return Some(self.absolutize(data));
                    }
                }
            }
            None
        };

        match tokio::time::timeout(CONNECT_TIMEOUT, discovery).await {
            Ok(Some(endpoint)) => {
                debug!(endpoint = %endpoint, "SSE endpoint discovered");
                endpoint
            }
            _ => {
                debug!(endpoint = %fallback, "SSE discovery failed, using fallback");
                fallback
            }
        }
    }

    fn absolutize(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http") {
            endpoint.to_string()
        } else {
            format!("{}{}", self.base_url, endpoint)
        }
    }

    async fn send_request(
        &mut self,
        method: &str,
        params: serde_json::Value,
        timeout: std::time::Duration,
    ) -> Result<serde_json::Value, McpError> {
        self.request_id += 1;
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": self.request_id,
            "method": method,
            "params": params,
        });
        let endpoint = self
            .message_endpoint
            .clone()
            .unwrap_or_else(|| format!("{}/message", self.base_url));

        debug!(method, id = self.request_id, "mcp → POST");
        let resp = self
            .client
            .post(&endpoint)
            .json(&request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                self.connected = false;
                if e.is_timeout() {
                    McpError::Timeout(method.to_string())
                } else {
                    McpError::Connection(format!("HTTP error on {method}: {e}"))
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(McpError::Connection(format!(
                "HTTP {status} on {method}: {}",
                &body[..body.len().min(200)]
            )));
        }

        let response: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| McpError::Connection(format!("invalid JSON response: {e}")))?;

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

    /// Fire-and-forget notification; failures are logged, never returned.
    async fn send_notification(&self, method: &str) {
        let notification = serde_json::json!({ "jsonrpc": "2.0", "method": method });
        let endpoint = self
            .message_endpoint
            .clone()
            .unwrap_or_else(|| format!("{}/message", self.base_url));

        match self.client.post(&endpoint).json(&notification).send().await {
            Ok(resp) if !matches!(resp.status().as_u16(), 200 | 202) => {
                warn!(method, status = resp.status().as_u16(), "notification rejected");
            }
            Ok(_) => {}
            Err(e) => warn!(method, error = %e, "notification failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolutize_handles_relative_and_absolute() {
        let client = SseClient::new("http://kb.local:8080/mcp", BTreeMap::new()).unwrap();
        assert_eq!(
            client.absolutize("/messages/session-1"),
            "http://kb.local:8080/mcp/messages/session-1"
        );
        assert_eq!(
            client.absolutize("http://other.local/rpc"),
            "http://other.local/rpc"
        );
    }

    #[test]
    fn invalid_header_name_rejected_at_construction() {
        let mut headers = BTreeMap::new();
        headers.insert("bad header\n".to_string(), "x".to_string());
        assert!(SseClient::new("http://kb.local", headers).is_err());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = SseClient::new("http://kb.local:8080/mcp/", BTreeMap::new()).unwrap();
        assert_eq!(client.base_url, "http://kb.local:8080/mcp");
    }

    #[tokio::test]
    async fn request_before_connect_fails() {
        let mut client = SseClient::new("http://127.0.0.1:1", BTreeMap::new()).unwrap();
        let err = client.list_tools().await.unwrap_err();
        assert!(matches!(err, McpError::Connection(_)));
    }
}
