use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::markup::MarkupSchema;

/// One callable method of a tool: its function-calling definition plus an
/// optional markup form. A tool exposes one schema per method it offers.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    /// Canonical function name (e.g. "message_notify_user").
    pub name: String,
    /// Function definition in OpenAPI function-calling form, as sent to the LM.
    pub definition: Value,
    /// Markup form, if the method can also be invoked as an inline block.
    pub markup: Option<MarkupSchema>,
}

/// A tool invocation parsed out of a model response.
///
/// `id` is the LM-assigned call id for structured calls and a synthesized
/// UUID for markup calls. `xml_tag_name` is set only when the call
/// originated from a markup block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub function_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xml_tag_name: Option<String>,
    pub arguments: Value,
}

impl ToolCall {
    /// A call parsed from a markup block (synthesized id).
    pub fn from_markup(tag: impl Into<String>, function_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            function_name: function_name.into(),
            xml_tag_name: Some(tag.into()),
            arguments,
        }
    }

    /// A call assembled from structured deltas (LM-assigned id).
    pub fn structured(id: impl Into<String>, function_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            function_name: function_name.into(),
            xml_tag_name: None,
            arguments,
        }
    }

    /// Display name preferring the original markup tag.
    pub fn display_name(&self) -> &str {
        self.xml_tag_name.as_deref().unwrap_or(&self.function_name)
    }
}

/// Result of executing a tool. Every execution attempt produces exactly one,
/// including on failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub success: bool,
    pub output: Value,
}

impl ToolResult {
    pub fn ok(output: impl Into<Value>) -> Self {
        Self { success: true, output: output.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { success: false, output: Value::String(message.into()) }
    }

    /// The output as a plain string: string values unquoted, everything
    /// else rendered as JSON.
    pub fn output_text(&self) -> String {
        match &self.output {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for ToolResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ToolResult(success={}, output={})", self.success, self.output_text())
    }
}

/// The primary extension point: all tools implement this trait.
///
/// A tool declares its callable methods via [`schemas`](Tool::schemas) and
/// dispatches invocations by method name. Object-safe, Send + Sync, async.
#[async_trait]
pub trait Tool: Send + Sync {
    /// One schema per callable method.
    fn schemas(&self) -> Vec<ToolSchema>;

    /// Invoke a method with the given JSON arguments.
    async fn invoke(&self, method: &str, args: Value) -> Result<ToolResult, ToolError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Unknown method: {0}")]
    UnknownMethod(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Simple echo tool for testing purposes.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn schemas(&self) -> Vec<ToolSchema> {
        use crate::markup::{MappingKind, MarkupMapping};
        vec![ToolSchema {
            name: "echo".to_string(),
            definition: serde_json::json!({
                "type": "function",
                "function": {
                    "name": "echo",
                    "description": "Echoes back the input message. For testing.",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "message": {
                                "type": "string",
                                "description": "The message to echo back"
                            }
                        },
                        "required": ["message"]
                    }
                }
            }),
            markup: Some(MarkupSchema {
                tag_name: "echo".to_string(),
                mappings: vec![MarkupMapping {
                    param_name: "message".to_string(),
                    kind: MappingKind::Content,
                    path: ".".to_string(),
                    required: true,
                }],
                example: Some("<echo>hello</echo>".to_string()),
            }),
        }]
    }

    async fn invoke(&self, method: &str, args: Value) -> Result<ToolResult, ToolError> {
        if method != "echo" {
            return Err(ToolError::UnknownMethod(method.to_string()));
        }
        let message = args
            .get("message")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing 'message' field".to_string()))?;
        Ok(ToolResult::ok(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_serialization() {
        let call = ToolCall::structured("call_001", "echo", serde_json::json!({"message": "hello"}));
        let json = serde_json::to_string(&call).unwrap();
        let roundtrip: ToolCall = serde_json::from_str(&json).unwrap();
        assert_eq!(roundtrip.id, "call_001");
        assert_eq!(roundtrip.function_name, "echo");
        assert!(roundtrip.xml_tag_name.is_none());
    }

    #[test]
    fn markup_call_gets_synthesized_id() {
        let call = ToolCall::from_markup("greet", "greet_user", serde_json::json!({}));
        assert!(!call.id.is_empty());
        assert_eq!(call.display_name(), "greet");
    }

    #[test]
    fn tool_result_display() {
        let result = ToolResult::ok("done");
        assert_eq!(result.to_string(), "ToolResult(success=true, output=done)");

        let failure = ToolResult::error("boom");
        assert_eq!(failure.to_string(), "ToolResult(success=false, output=boom)");
    }

    #[test]
    fn structured_output_renders_as_json() {
        let result = ToolResult::ok(serde_json::json!({"count": 3}));
        assert_eq!(result.output_text(), r#"{"count":3}"#);
    }

    #[tokio::test]
    async fn echo_tool_invokes() {
        let tool = EchoTool;
        let schemas = tool.schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].name, "echo");

        let result = tool
            .invoke("echo", serde_json::json!({"message": "hello world"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output_text(), "hello world");
    }

    #[tokio::test]
    async fn echo_tool_rejects_unknown_method() {
        let err = EchoTool.invoke("nope", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownMethod(_)));
    }
}
