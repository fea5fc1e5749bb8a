//! Thread message data model.
//!
//! Messages follow the chat-completion wire shape: a role, string-or-parts
//! content, native tool-call records on assistant messages, and
//! `tool_call_id`/`name` on tool responses.

use serde::{Deserialize, Serialize};

/// Role of a message in a thread.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Message content: plain text, or an ordered list of parts once images
/// (or other attachments) are involved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// The textual portion of the content (parts are concatenated).
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// A single part of a multi-part message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageRef },
}

/// Inline image reference, carried as a base64 data URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageRef {
    pub url: String,
    pub detail: String,
}

/// An image attachment supplied alongside a user message, prior to
/// normalization into a [`ContentPart::ImageUrl`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub content_type: String,
    pub base64: String,
}

impl ImageAttachment {
    /// Render as a data-URL content part with high detail.
    pub fn to_part(&self) -> ContentPart {
        ContentPart::ImageUrl {
            image_url: ImageRef {
                url: format!("data:{};base64,{}", self.content_type, self.base64),
                detail: "high".to_string(),
            },
        }
    }
}

/// A tool call in its native (function-calling) wire shape, as recorded on
/// assistant messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON argument text as produced by the model.
    pub arguments: String,
}

impl ToolCallRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// A message in a conversation thread.
///
/// Invariant: every `tool` message references a `tool_call_id` from the
/// nearest preceding assistant message's `tool_calls`, and each assistant
/// message carrying N tool calls is followed by exactly N tool messages
/// before any non-tool message. The thread store's repair routine restores
/// this when a run is interrupted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub role: Role,
    pub content: MessageContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ThreadMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, text)
    }

    /// Assistant message carrying native tool-call records.
    pub fn assistant_with_tool_calls(
        text: impl Into<String>,
        tool_calls: Vec<ToolCallRecord>,
    ) -> Self {
        Self {
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            ..Self::plain(Role::Assistant, text)
        }
    }

    /// Tool response message referencing a prior assistant tool call.
    pub fn tool_response(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            ..Self::plain(Role::Tool, content)
        }
    }

    fn plain(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    /// Number of tool calls recorded on this message (0 for non-assistant).
    pub fn tool_call_count(&self) -> usize {
        self.tool_calls.as_ref().map_or(0, |c| c.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        assert_eq!(serde_json::to_string(&Role::Tool).unwrap(), "\"tool\"");
    }

    #[test]
    fn plain_message_omits_optional_fields() {
        let msg = ThreadMessage::user("hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hello");
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("tool_call_id").is_none());
    }

    #[test]
    fn tool_response_roundtrip() {
        let msg = ThreadMessage::tool_response("call_1", "echo", "hi");
        let json = serde_json::to_string(&msg).unwrap();
        let back: ThreadMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, Role::Tool);
        assert_eq!(back.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(back.name.as_deref(), Some("echo"));
    }

    #[test]
    fn image_attachment_becomes_data_url_part() {
        let att = ImageAttachment {
            content_type: "image/png".to_string(),
            base64: "aGVsbG8=".to_string(),
        };
        match att.to_part() {
            ContentPart::ImageUrl { image_url } => {
                assert_eq!(image_url.url, "data:image/png;base64,aGVsbG8=");
                assert_eq!(image_url.detail, "high");
            }
            other => panic!("unexpected part: {other:?}"),
        }
    }

    #[test]
    fn parts_content_concatenates_text() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text { text: "a".into() },
            ContentPart::ImageUrl {
                image_url: ImageRef { url: "data:x".into(), detail: "high".into() },
            },
            ContentPart::Text { text: "b".into() },
        ]);
        assert_eq!(content.as_text(), "ab");
    }
}
