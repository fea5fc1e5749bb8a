//! User communication tool: notifications, questions, and the idle marker.

use async_trait::async_trait;
use serde_json::Value;

use crate::markup::{MappingKind, MarkupMapping, MarkupSchema};
use crate::tool::{Tool, ToolError, ToolResult, ToolSchema};

/// Tool for user communication: notify without a response, ask and wait,
/// and signal that all tasks are done.
pub struct MessageTool;

impl MessageTool {
    fn attachments_from(args: &Value) -> Option<Vec<String>> {
        match args.get("attachments") {
            Some(Value::String(s)) => Some(s.split(',').map(|a| a.trim().to_string()).collect()),
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect(),
            ),
            _ => None,
        }
    }

    fn text_arg(args: &Value) -> Result<&str, ToolError> {
        args.get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing 'text' field".to_string()))
    }

    fn with_attachments(mut body: String, attachments: Option<Vec<String>>) -> String {
        if let Some(attachments) = attachments {
            if !attachments.is_empty() {
                body.push_str("\n\nAttachments:\n- ");
                body.push_str(&attachments.join("\n- "));
            }
        }
        body
    }

    async fn notify(&self, args: Value) -> Result<ToolResult, ToolError> {
        let text = Self::text_arg(&args)?;
        let response = Self::with_attachments(
            format!("NOTIFICATION: {text}"),
            Self::attachments_from(&args),
        );
        Ok(ToolResult::ok(response))
    }

    async fn ask(&self, args: Value) -> Result<ToolResult, ToolError> {
        let text = Self::text_arg(&args)?;
        let mut response = Self::with_attachments(
            format!("QUESTION: {text}"),
            Self::attachments_from(&args),
        );
        if let Some(takeover) = args.get("suggest_user_takeover").and_then(|v| v.as_str()) {
            if takeover != "none" {
                response.push_str(&format!("\n\nSuggested takeover: {takeover}"));
            }
        }
        Ok(ToolResult::ok(response))
    }

    async fn idle(&self) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::ok("Entering idle state"))
    }
}

#[async_trait]
impl Tool for MessageTool {
    fn schemas(&self) -> Vec<ToolSchema> {
        vec![
            ToolSchema {
                name: "message_notify_user".to_string(),
                definition: serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": "message_notify_user",
                        "description": "Send a message to user without requiring a response. Use for acknowledging receipt of messages, providing progress updates, reporting task completion, or explaining changes in approach.",
                        "parameters": {
                            "type": "object",
                            "properties": {
                                "text": {
                                    "type": "string",
                                    "description": "Message text to display to user"
                                },
                                "attachments": {
                                    "anyOf": [
                                        {"type": "string"},
                                        {"items": {"type": "string"}, "type": "array"}
                                    ],
                                    "description": "(Optional) List of attachments to show to user, can be file paths or URLs"
                                }
                            },
                            "required": ["text"]
                        }
                    }
                }),
                markup: Some(MarkupSchema {
                    tag_name: "message-notify-user".to_string(),
                    mappings: vec![
                        MarkupMapping {
                            param_name: "text".to_string(),
                            kind: MappingKind::Content,
                            path: ".".to_string(),
                            required: true,
                        },
                        MarkupMapping {
                            param_name: "attachments".to_string(),
                            kind: MappingKind::Attribute,
                            path: "attachments".to_string(),
                            required: false,
                        },
                    ],
                    example: Some(
                        "<message-notify-user attachments=\"report.pdf\">Task completed successfully!</message-notify-user>"
                            .to_string(),
                    ),
                }),
            },
            ToolSchema {
                name: "message_ask_user".to_string(),
                definition: serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": "message_ask_user",
                        "description": "Ask user a question and wait for response. Use for requesting clarification, asking for confirmation, or gathering additional information.",
                        "parameters": {
                            "type": "object",
                            "properties": {
                                "text": {
                                    "type": "string",
                                    "description": "Question text to present to user"
                                },
                                "attachments": {
                                    "anyOf": [
                                        {"type": "string"},
                                        {"items": {"type": "string"}, "type": "array"}
                                    ],
                                    "description": "(Optional) List of question-related files or reference materials"
                                },
                                "suggest_user_takeover": {
                                    "type": "string",
                                    "enum": ["none", "browser"],
                                    "description": "(Optional) Suggested operation for user takeover"
                                }
                            },
                            "required": ["text"]
                        }
                    }
                }),
                markup: Some(MarkupSchema {
                    tag_name: "message-ask-user".to_string(),
                    mappings: vec![
                        MarkupMapping {
                            param_name: "text".to_string(),
                            kind: MappingKind::Content,
                            path: ".".to_string(),
                            required: true,
                        },
                        MarkupMapping {
                            param_name: "attachments".to_string(),
                            kind: MappingKind::Attribute,
                            path: "attachments".to_string(),
                            required: false,
                        },
                        MarkupMapping {
                            param_name: "suggest_user_takeover".to_string(),
                            kind: MappingKind::Attribute,
                            path: "suggest_user_takeover".to_string(),
                            required: false,
                        },
                    ],
                    example: Some(
                        "<message-ask-user suggest_user_takeover=\"browser\">Would you like to continue with this approach?</message-ask-user>"
                            .to_string(),
                    ),
                }),
            },
            ToolSchema {
                name: "idle".to_string(),
                definition: serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": "idle",
                        "description": "A special tool to indicate you have completed all tasks and are about to enter idle state.",
                        "parameters": {
                            "type": "object"
                        }
                    }
                }),
                markup: Some(MarkupSchema {
                    tag_name: "idle".to_string(),
                    mappings: vec![],
                    example: Some("<idle></idle>".to_string()),
                }),
            },
        ]
    }

    async fn invoke(&self, method: &str, args: Value) -> Result<ToolResult, ToolError> {
        match method {
            "message_notify_user" => self.notify(args).await,
            "message_ask_user" => self.ask(args).await,
            "idle" => self.idle().await,
            other => Err(ToolError::UnknownMethod(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_formats_attachments() {
        let result = MessageTool
            .invoke(
                "message_notify_user",
                serde_json::json!({
                    "text": "Processing has completed successfully!",
                    "attachments": "results.txt,output.log"
                }),
            )
            .await
            .unwrap();

        assert!(result.success);
        let text = result.output_text();
        assert!(text.starts_with("NOTIFICATION: Processing"));
        assert!(text.contains("- results.txt"));
        assert!(text.contains("- output.log"));
    }

    #[tokio::test]
    async fn ask_includes_takeover_suggestion() {
        let result = MessageTool
            .invoke(
                "message_ask_user",
                serde_json::json!({
                    "text": "Proceed?",
                    "suggest_user_takeover": "browser"
                }),
            )
            .await
            .unwrap();

        let text = result.output_text();
        assert!(text.starts_with("QUESTION: Proceed?"));
        assert!(text.contains("Suggested takeover: browser"));
    }

    #[tokio::test]
    async fn ask_requires_text() {
        let err = MessageTool
            .invoke("message_ask_user", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn idle_succeeds_with_no_arguments() {
        let result = MessageTool
            .invoke("idle", serde_json::json!({}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output_text(), "Entering idle state");
    }

    #[test]
    fn markup_example_parses_against_schema() {
        let schemas = MessageTool.schemas();
        let notify = schemas[0].markup.as_ref().unwrap();
        let args = notify
            .parse_arguments(notify.example.as_deref().unwrap())
            .unwrap();
        assert_eq!(args["text"], "Task completed successfully!");
        assert_eq!(args["attachments"], "report.pdf");
    }
}
