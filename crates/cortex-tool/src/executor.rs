use std::time::Duration;

use tracing::{debug, info, warn};

use cortex_provider::{
    GenerateRequest, GenerateResponse, LlmProvider, ProviderError, Role,
};

use crate::registry::ToolRegistry;
use crate::ToolResult;

/// Upper bound on tool-call rounds within one pipeline run.
pub const MAX_TOOL_ROUNDS: usize = 5;

/// Hard cap on a single tool execution.
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(15);

const OPEN_TAG: &str = "<tool_call>";
const CLOSE_TAG: &str = "</tool_call>";

/// A tool call parsed out of LLM output text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    pub tool_name: String,
    pub arguments: serde_json::Map<String, serde_json::Value>,
    /// The literal marker text, for stripping from the response.
    pub raw_marker: String,
}

/// Parse the first `<tool_call>{json}</tool_call>` marker from text.
///
/// Accepts `tool`/`name` and `arguments`/`params` field aliases. A missing
/// closing tag parses to the end of the string. Malformed JSON or a missing
/// tool name yields `None` — the text is then plain prose, not a call.
/// Non-object arguments are replaced with an empty object.
pub fn parse_tool_call(text: &str) -> Option<ParsedToolCall> {
    let start = text.find(OPEN_TAG)?;
    let body_start = start + OPEN_TAG.len();

    let (body, marker_end) = match text[body_start..].find(CLOSE_TAG) {
        Some(rel) => (
            &text[body_start..body_start + rel],
            body_start + rel + CLOSE_TAG.len(),
        ),
        // The model sometimes forgets the closing tag; take the rest.
        None => (&text[body_start..], text.len()),
    };

    let raw_marker = text[start..marker_end].to_string();
    let data: serde_json::Value = match serde_json::from_str(body.trim()) {
        Ok(data) => data,
        Err(e) => {
            warn!(error = %e, "tool call marker contains invalid JSON");
            return None;
        }
    };

    let tool_name = data
        .get("tool")
        .or_else(|| data.get("name"))
        .and_then(|v| v.as_str())?
        .to_string();

    let arguments = data
        .get("arguments")
        .or_else(|| data.get("params"))
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();

    Some(ParsedToolCall {
        tool_name,
        arguments,
        raw_marker,
    })
}

/// Execute a parsed tool call. Always returns a result, never errors.
pub async fn execute_tool_call(
    registry: &ToolRegistry,
    call: &ParsedToolCall,
    user_id: &str,
) -> ToolResult {
    execute_by_name(
        registry,
        &call.tool_name,
        serde_json::Value::Object(call.arguments.clone()),
        user_id,
    )
    .await
}

/// Look up, gate, and execute a tool under the per-call timeout.
pub async fn execute_by_name(
    registry: &ToolRegistry,
    tool_name: &str,
    args: serde_json::Value,
    user_id: &str,
) -> ToolResult {
    let Some(tool) = registry.get(tool_name) else {
        return ToolResult::error(tool_name, format!("unknown tool: {tool_name}"));
    };

    if !registry.is_enabled(user_id, tool_name) {
        return ToolResult::error(tool_name, format!("tool '{tool_name}' is disabled"));
    }

    match tokio::time::timeout(TOOL_TIMEOUT, tool.execute(args, user_id)).await {
        Ok(result) => {
            info!(
                tool = tool_name,
                success = result.success,
                content_len = result.content.len(),
                "tool executed"
            );
            result
        }
        Err(_) => {
            warn!(tool = tool_name, timeout_s = TOOL_TIMEOUT.as_secs(), "tool timed out");
            ToolResult::error(
                tool_name,
                format!("timed out after {}s", TOOL_TIMEOUT.as_secs()),
            )
        }
    }
}

/// Shim-mode tool loop for providers without native function calling.
///
/// Each round: generate, look for a marker, execute, strip the marker from
/// the response, append the cleaned text as an assistant turn and the tool
/// result as a `[Tool result]` system turn, repeat. When the round budget
/// runs out, one final generation is returned verbatim.
pub async fn run_shim_tool_loop(
    provider: &dyn LlmProvider,
    mut req: GenerateRequest,
    registry: &ToolRegistry,
    user_id: &str,
) -> Result<GenerateResponse, ProviderError> {
    for round in 0..MAX_TOOL_ROUNDS {
        let response = provider.generate(&req).await?;

        let Some(call) = parse_tool_call(&response.content) else {
            return Ok(response);
        };

        info!(
            round = round + 1,
            max = MAX_TOOL_ROUNDS,
            tool = %call.tool_name,
            "shim tool loop: executing tool"
        );

        let result = execute_tool_call(registry, &call, user_id).await;

        let cleaned = response.content.replace(&call.raw_marker, "");
        let cleaned = cleaned.trim();
        if !cleaned.is_empty() {
            req.messages.push(cortex_provider::Message {
                role: Role::Assistant,
                content: cleaned.to_string(),
            });
        }
        req.messages.push(cortex_provider::Message {
            role: Role::System,
            content: format!("[Tool result]\n{}", result.to_context_string()),
        });
    }

    warn!(user = user_id, max_rounds = MAX_TOOL_ROUNDS, "shim tool loop hit round limit");
    provider.generate(&req).await
}

/// Native tool loop for providers that emit structured tool calls.
///
/// Conversation state lives in `raw_messages` so assistant `tool_use` and
/// user `tool_result` blocks survive round trips. The same round budget and
/// per-call timeout apply as in shim mode.
pub async fn run_native_tool_loop(
    provider: &dyn LlmProvider,
    mut req: GenerateRequest,
    registry: &ToolRegistry,
    user_id: &str,
) -> Result<GenerateResponse, ProviderError> {
    let mut raw_messages: Vec<serde_json::Value> = match req.raw_messages.take() {
        Some(raw) => raw,
        None => req
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| serde_json::json!({ "role": m.role.to_string(), "content": m.content }))
            .collect(),
    };
    // System-role turns can't ride in the raw message array; fold them into
    // the system prompt the same way the provider adapter would.
    let folded: Vec<String> = req
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.clone())
        .collect();
    if !folded.is_empty() {
        let mut system = req.system.take().unwrap_or_default();
        if !system.is_empty() {
            system.push_str("\n\n");
        }
        system.push_str(&folded.join("\n\n"));
        req.system = Some(system);
    }

    let mut last_response: Option<GenerateResponse> = None;

    for round in 0..MAX_TOOL_ROUNDS {
        let mut round_req = req.clone();
        round_req.raw_messages = Some(raw_messages.clone());

        debug!(round, "native tool loop iteration");
        let response = provider.generate(&round_req).await?;

        if response.tool_calls.is_empty() || response.stop_reason != "tool_use" {
            return Ok(response);
        }

        let mut assistant_content: Vec<serde_json::Value> = Vec::new();
        if !response.content.is_empty() {
            assistant_content.push(serde_json::json!({
                "type": "text",
                "text": response.content,
            }));
        }
        for call in &response.tool_calls {
            assistant_content.push(serde_json::json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.name,
                "input": call.input,
            }));
        }
        raw_messages.push(serde_json::json!({
            "role": "assistant",
            "content": assistant_content,
        }));

        let mut tool_results: Vec<serde_json::Value> = Vec::new();
        for call in &response.tool_calls {
            let result = execute_by_name(registry, &call.name, call.input.clone(), user_id).await;
            tool_results.push(serde_json::json!({
                "type": "tool_result",
                "tool_use_id": call.id,
                "content": result.to_context_string(),
                "is_error": !result.success,
            }));
        }
        raw_messages.push(serde_json::json!({
            "role": "user",
            "content": tool_results,
        }));

        last_response = Some(response);
    }

    warn!(user = user_id, max_rounds = MAX_TOOL_ROUNDS, "native tool loop hit round limit");
    match last_response {
        Some(resp) => Ok(resp),
        None => Err(ProviderError::Parse(format!(
            "tool loop exceeded {MAX_TOOL_ROUNDS} rounds without a final response"
        ))),
    }
}
