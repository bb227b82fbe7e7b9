use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::manager::ApiKeyStore;
use crate::provider::{
    GenerateRequest, GenerateResponse, LlmProvider, NativeToolCall, ProviderError, Role,
};

const API_VERSION: &str = "2023-06-01";

/// Remote REST provider with native function calling.
///
/// The service key comes from the secret collaborator at startup; a user
/// with their own stored key (via `/apikey`) gets requests signed with it
/// instead.
pub struct AnthropicProvider {
    client: reqwest::Client,
    base_url: String,
    service_key: Option<String>,
    user_keys: Option<Arc<ApiKeyStore>>,
}

impl AnthropicProvider {
    pub fn new(service_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
            service_key,
            user_keys: None,
        }
    }

    /// Attach the per-user API key store.
    pub fn with_user_keys(mut self, keys: Arc<ApiKeyStore>) -> Self {
        self.user_keys = Some(keys);
        self
    }

    /// Key resolution order: requesting user's stored key, then the
    /// service key.
    fn key_for(&self, user_id: Option<&str>) -> Result<String, ProviderError> {
        if let (Some(user), Some(keys)) = (user_id, self.user_keys.as_deref()) {
            if let Some(key) = keys.get(user, self.id()) {
                return Ok(key);
            }
        }
        self.service_key
            .clone()
            .ok_or_else(|| ProviderError::AuthRejected("no API key configured".to_string()))
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn name(&self) -> &str {
        "Anthropic"
    }

    fn supports_native_tools(&self) -> bool {
        true
    }

    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let api_key = self.key_for(req.user_id.as_deref())?;
        let body = build_request_body(req);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %req.model, "sending request to Anthropic");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    ProviderError::Unavailable(e.to_string())
                } else {
                    ProviderError::Http(e)
                }
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Anthropic API error");
            return Err(match status {
                401 | 403 => ProviderError::AuthRejected(text),
                429 => ProviderError::QuotaExhausted(text),
                _ => ProviderError::Api {
                    status,
                    message: text,
                },
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp))
    }

    async fn health_check(&self) -> bool {
        self.list_models().await.is_ok()
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let api_key = self.key_for(None)?;
        let url = format!("{}/v1/models", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    ProviderError::Unavailable(e.to_string())
                } else {
                    ProviderError::Http(e)
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(match status {
                401 | 403 => ProviderError::AuthRejected(text),
                _ => ProviderError::Api {
                    status,
                    message: text,
                },
            });
        }

        let models: ModelsResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(models.data.into_iter().map(|m| m.id).collect())
    }
}

fn build_request_body(req: &GenerateRequest) -> serde_json::Value {
    // The messages API has no system role: fold system-role turns (summary
    // messages, retrieved context) into the system string and map the rest.
    let mut system_parts: Vec<String> = Vec::new();
    if let Some(ref system) = req.system {
        system_parts.push(system.clone());
    }

    let messages: Vec<serde_json::Value> = if let Some(ref raw) = req.raw_messages {
        raw.clone()
    } else {
        req.messages
            .iter()
            .filter_map(|m| match m.role {
                Role::System => {
                    system_parts.push(m.content.clone());
                    None
                }
                Role::User => Some(serde_json::json!({ "role": "user", "content": m.content })),
                Role::Assistant => {
                    Some(serde_json::json!({ "role": "assistant", "content": m.content }))
                }
            })
            .collect()
    };

    let mut body = serde_json::json!({
        "model": req.model,
        "max_tokens": req.max_tokens,
        "temperature": req.temperature,
        "messages": messages,
        "stream": false,
    });

    if !system_parts.is_empty() {
        body["system"] = serde_json::Value::String(system_parts.join("\n\n"));
    }

    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();
        body["tools"] = serde_json::Value::Array(tools);
    }

    body
}

fn parse_response(resp: ApiResponse) -> GenerateResponse {
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<NativeToolCall> = Vec::new();

    for block in resp.content {
        match block {
            ContentBlock::Text { text } => text_parts.push(text),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(NativeToolCall { id, name, input });
            }
        }
    }

    GenerateResponse {
        content: text_parts.join(""),
        model: resp.model,
        tokens_in: resp.usage.input_tokens,
        tokens_out: resp.usage.output_tokens,
        stop_reason: resp.stop_reason.unwrap_or_default(),
        tool_calls,
    }
}

// Anthropic API response types (deserialization only)

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Message, ToolDefinition};

    #[test]
    fn system_turns_fold_into_system_field() {
        let req = GenerateRequest {
            model: "claude-sonnet-4-5".into(),
            system: Some("identity".into()),
            messages: vec![
                Message::system("[Previous conversation summary]: old stuff"),
                Message::user("hi"),
            ],
            max_tokens: 512,
            temperature: 0.7,
            ..Default::default()
        };
        let body = build_request_body(&req);
        let system = body["system"].as_str().unwrap();
        assert!(system.contains("identity"));
        assert!(system.contains("old stuff"));

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
    }

    #[test]
    fn tools_are_injected_when_present() {
        let req = GenerateRequest {
            model: "claude-sonnet-4-5".into(),
            messages: vec![Message::user("hi")],
            max_tokens: 512,
            temperature: 0.0,
            tools: vec![ToolDefinition {
                name: "web_search".into(),
                description: "search".into(),
                input_schema: serde_json::json!({"type": "object", "properties": {}}),
            }],
            ..Default::default()
        };
        let body = build_request_body(&req);
        assert_eq!(body["tools"][0]["name"], "web_search");
    }

    #[test]
    fn raw_messages_take_precedence() {
        let raw = vec![serde_json::json!({"role": "user", "content": [{"type": "text", "text": "x"}]})];
        let req = GenerateRequest {
            model: "m".into(),
            messages: vec![Message::user("ignored")],
            raw_messages: Some(raw),
            max_tokens: 1,
            temperature: 0.0,
            ..Default::default()
        };
        let body = build_request_body(&req);
        assert!(body["messages"][0]["content"].is_array());
    }

    #[test]
    fn parse_extracts_tool_calls() {
        let resp = parse_response(ApiResponse {
            model: "claude-sonnet-4-5".into(),
            content: vec![
                ContentBlock::Text { text: "Looking...".into() },
                ContentBlock::ToolUse {
                    id: "toolu_1".into(),
                    name: "web_search".into(),
                    input: serde_json::json!({"query": "cat"}),
                },
            ],
            stop_reason: Some("tool_use".into()),
            usage: Usage { input_tokens: 10, output_tokens: 4 },
        });
        assert_eq!(resp.content, "Looking...");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "web_search");
        assert_eq!(resp.stop_reason, "tool_use");
    }
}
