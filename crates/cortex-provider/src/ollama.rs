use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::provider::{
    GenerateRequest, GenerateResponse, LlmProvider, ProviderError, Role,
};

/// Pipe-inference server adapter (Ollama wire format).
///
/// Shim-mode provider: no native function calling, tool descriptions live
/// in the system prompt and calls are parsed out of the response text.
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn id(&self) -> &str {
        "ollama"
    }

    fn name(&self) -> &str {
        "Ollama"
    }

    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let body = build_request_body(req);
        let url = format!("{}/api/chat", self.base_url);

        debug!(model = %req.model, "sending request to Ollama");

        let resp = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                // Connection failures surface as Unavailable so the manager
                // can fall back instead of treating this as an API error.
                if e.is_connect() || e.is_timeout() {
                    ProviderError::Unavailable(e.to_string())
                } else {
                    ProviderError::Http(e)
                }
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Ollama API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp))
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self.client.get(&url).send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                ProviderError::Unavailable(e.to_string())
            } else {
                ProviderError::Http(e)
            }
        })?;

        let tags: TagsResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

fn build_request_body(req: &GenerateRequest) -> serde_json::Value {
    // Ollama takes an OpenAI-style messages array; the system prompt rides
    // as the first system message.
    let mut messages = Vec::new();
    if let Some(ref system) = req.system {
        messages.push(serde_json::json!({ "role": "system", "content": system }));
    }
    for m in &req.messages {
        let role = match m.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        };
        messages.push(serde_json::json!({ "role": role, "content": m.content }));
    }

    serde_json::json!({
        "model": req.model,
        "messages": messages,
        "stream": false,
        "options": {
            "num_predict": req.max_tokens,
            "temperature": req.temperature,
        },
    })
}

fn parse_response(resp: ApiResponse) -> GenerateResponse {
    GenerateResponse {
        content: resp.message.content,
        model: resp.model,
        tokens_in: resp.prompt_eval_count.unwrap_or(0),
        tokens_out: resp.eval_count.unwrap_or(0),
        stop_reason: if resp.done { "stop".to_string() } else { String::new() },
        tool_calls: Vec::new(),
    }
}

// Ollama API response types (deserialization only)

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    message: ApiMessage,
    done: bool,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}
