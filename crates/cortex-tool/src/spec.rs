use serde::{Deserialize, Serialize};

use cortex_provider::ToolDefinition;

use crate::Tool;

/// OpenAI function-calling spec for a tool. The serialized form is what
/// native-function-calling providers consume out-of-band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionBody {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl FunctionSpec {
    pub fn from_tool(tool: &dyn Tool) -> Self {
        Self {
            kind: "function".to_string(),
            function: FunctionBody {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            },
        }
    }

    /// Inverse of `from_tool` at the definition level: name, description,
    /// and schema survive the round trip.
    pub fn into_definition(self) -> ToolDefinition {
        ToolDefinition {
            name: self.function.name,
            description: self.function.description,
            input_schema: self.function.parameters,
        }
    }
}

impl From<ToolDefinition> for FunctionSpec {
    fn from(def: ToolDefinition) -> Self {
        Self {
            kind: "function".to_string(),
            function: FunctionBody {
                name: def.name,
                description: def.description,
                parameters: def.input_schema,
            },
        }
    }
}

/// Plaintext description for shim-mode prompts: the tool, its parameters,
/// and required/optional markers.
pub fn prompt_description(tool: &dyn Tool) -> String {
    let schema = tool.parameters_schema();
    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    let mut params = Vec::new();
    if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
        for (name, info) in props {
            let marker = if required.contains(&name.as_str()) {
                " (required)"
            } else {
                " (optional)"
            };
            let kind = info.get("type").and_then(|t| t.as_str()).unwrap_or("string");
            let desc = info.get("description").and_then(|d| d.as_str()).unwrap_or("");
            let enum_str = info
                .get("enum")
                .and_then(|e| e.as_array())
                .map(|vals| {
                    let opts: Vec<&str> = vals.iter().filter_map(|v| v.as_str()).collect();
                    format!(" [one of: {}]", opts.join(", "))
                })
                .unwrap_or_default();
            params.push(format!("  - {name} ({kind}{marker}): {desc}{enum_str}"));
        }
    }

    let params_block = if params.is_empty() {
        "  (no parameters)".to_string()
    } else {
        params.join("\n")
    };
    format!(
        "- **{}**: {}\n  Parameters:\n{}",
        tool.name(),
        tool.description(),
        params_block
    )
}

/// System-prompt block teaching a shim-mode model the tool-call marker
/// format, followed by the available tool descriptions.
pub fn build_shim_system_prompt(descriptions: &str) -> String {
    if descriptions.is_empty() {
        return String::new();
    }
    format!(
        "To use a tool, output EXACTLY this format (one tool per response):\n\
         <tool_call>\n\
         {{\"tool\": \"tool_name\", \"arguments\": {{\"key\": \"value\"}}}}\n\
         </tool_call>\n\
         Only call one tool per response. If no tool is needed, respond normally.\n\n\
         Available tools:\n{descriptions}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolResult;
    use async_trait::async_trait;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input back"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "Text to echo" },
                    "mode": {
                        "type": "string",
                        "description": "Echo mode",
                        "enum": ["plain", "loud"]
                    }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, args: serde_json::Value, _user_id: &str) -> ToolResult {
            ToolResult::success("echo", args.to_string())
        }
    }

    #[test]
    fn function_spec_round_trips_definition() {
        let spec = FunctionSpec::from_tool(&EchoTool);
        let def = spec.clone().into_definition();
        let back: FunctionSpec = def.into();
        assert_eq!(back, spec);
        assert_eq!(back.function.name, "echo");
        assert_eq!(back.kind, "function");
    }

    #[test]
    fn spec_serializes_in_openai_shape() {
        let spec = FunctionSpec::from_tool(&EchoTool);
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "echo");
        assert!(json["function"]["parameters"]["properties"]["text"].is_object());
    }

    #[test]
    fn prompt_description_marks_required_and_enums() {
        let desc = prompt_description(&EchoTool);
        assert!(desc.contains("- **echo**: Echo the input back"));
        assert!(desc.contains("text (string (required)): Text to echo"));
        assert!(desc.contains("mode (string (optional)): Echo mode [one of: plain, loud]"));
    }

    #[test]
    fn shim_prompt_empty_without_tools() {
        assert_eq!(build_shim_system_prompt(""), "");
        let prompt = build_shim_system_prompt("- **echo**: Echo");
        assert!(prompt.contains("<tool_call>"));
        assert!(prompt.contains("Available tools:"));
    }
}
