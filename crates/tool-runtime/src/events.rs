//! The event stream emitted by the response processor and replayed to
//! observers. Serialized shapes are part of the wire contract:
//!
//! - `{type:"content", content}` — text delta
//! - `{type:"content", tool_call:{…}}` — structured fragment passthrough
//! - `{type:"tool_status", status, function_name, xml_tag_name?, message, tool_index}`
//! - `{type:"tool_result", function_name, xml_tag_name?, result, tool_index}`
//! - `{type:"finish", finish_reason}`
//! - `{type:"error", message}`
//!
//! Run-level `{type:"status", …}` markers are synthesized by the run
//! controller on top of this union, not by the processor.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tool::{ToolCall, ToolResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatusKind {
    Started,
    Completed,
    Failed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessorEvent {
    Content {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_call: Option<Value>,
    },
    ToolStatus {
        status: ToolStatusKind,
        function_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        xml_tag_name: Option<String>,
        message: String,
        tool_index: u64,
    },
    ToolResult {
        function_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        xml_tag_name: Option<String>,
        result: String,
        tool_index: u64,
    },
    Finish {
        finish_reason: String,
    },
    Error {
        message: String,
    },
}

impl ProcessorEvent {
    pub fn content(delta: impl Into<String>) -> Self {
        Self::Content {
            content: Some(delta.into()),
            tool_call: None,
        }
    }

    /// Raw structured-fragment passthrough for observers.
    pub fn tool_call_fragment(fragment: Value) -> Self {
        Self::Content {
            content: None,
            tool_call: Some(fragment),
        }
    }

    pub fn tool_started(call: &ToolCall, tool_index: u64) -> Self {
        Self::ToolStatus {
            status: ToolStatusKind::Started,
            function_name: call.function_name.clone(),
            xml_tag_name: call.xml_tag_name.clone(),
            message: format!("Starting execution of {}", call.display_name()),
            tool_index,
        }
    }

    pub fn tool_finished(call: &ToolCall, result: &ToolResult, tool_index: u64) -> Self {
        let outcome = if result.success { "completed successfully" } else { "failed" };
        Self::ToolStatus {
            status: if result.success { ToolStatusKind::Completed } else { ToolStatusKind::Failed },
            function_name: call.function_name.clone(),
            xml_tag_name: call.xml_tag_name.clone(),
            message: format!("Tool {} {}", call.display_name(), outcome),
            tool_index,
        }
    }

    pub fn tool_error(call: &ToolCall, error: impl std::fmt::Display, tool_index: u64) -> Self {
        Self::ToolStatus {
            status: ToolStatusKind::Error,
            function_name: call.function_name.clone(),
            xml_tag_name: call.xml_tag_name.clone(),
            message: format!("Error executing tool: {error}"),
            tool_index,
        }
    }

    pub fn tool_result(call: &ToolCall, result: &ToolResult, tool_index: u64) -> Self {
        Self::ToolResult {
            function_name: call.function_name.clone(),
            xml_tag_name: call.xml_tag_name.clone(),
            result: format_result(call, result),
            tool_index,
        }
    }

    pub fn finish(reason: impl Into<String>) -> Self {
        Self::Finish {
            finish_reason: reason.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Render a tool result for the event stream and for markup result
/// messages: markup-origin results are wrapped in their original tag.
pub fn format_result(call: &ToolCall, result: &ToolResult) -> String {
    match &call.xml_tag_name {
        Some(tag) => format!("<{tag}> {result} </{tag}>"),
        None => format!("Result for {}: {result}", call.function_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_event_shape() {
        let event = ProcessorEvent::content("hi");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "content");
        assert_eq!(json["content"], "hi");
        assert!(json.get("tool_call").is_none());
    }

    #[test]
    fn fragment_event_keeps_content_type() {
        let event = ProcessorEvent::tool_call_fragment(serde_json::json!({"index": 0}));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "content");
        assert_eq!(json["tool_call"]["index"], 0);
        assert!(json.get("content").is_none());
    }

    #[test]
    fn tool_status_shape() {
        let call = ToolCall::from_markup("greet", "greet_user", serde_json::json!({}));
        let event = ProcessorEvent::tool_started(&call, 3);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "tool_status");
        assert_eq!(json["status"], "started");
        assert_eq!(json["function_name"], "greet_user");
        assert_eq!(json["xml_tag_name"], "greet");
        assert_eq!(json["tool_index"], 3);
        assert_eq!(json["message"], "Starting execution of greet");
    }

    #[test]
    fn markup_result_is_tag_wrapped() {
        let call = ToolCall::from_markup("greet", "greet_user", serde_json::json!({}));
        let result = ToolResult::ok("Hello Ada");
        assert_eq!(
            format_result(&call, &result),
            "<greet> ToolResult(success=true, output=Hello Ada) </greet>"
        );
    }

    #[test]
    fn structured_result_is_plain() {
        let call = ToolCall::structured("c1", "echo", serde_json::json!({}));
        let result = ToolResult::ok("hi");
        assert_eq!(format_result(&call, &result), "Result for echo: ToolResult(success=true, output=hi)");
    }

    #[test]
    fn finish_event_roundtrip() {
        let event = ProcessorEvent::finish("markup_tool_limit_reached");
        let json = serde_json::to_string(&event).unwrap();
        let back: ProcessorEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
