//! File-backed thread store — one JSON file per thread.
//!
//! The store is the only mutator of thread message sequences. Before any
//! new user message it runs the repair routine, which restores the
//! assistant/tool pairing invariant broken by interrupted runs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use dirigent_core::{ContentPart, ImageAttachment, MessageContent, Role, ThreadMessage};
use dirigent_tool_runtime::{MessageSink, SinkError, ToolResult};

/// A conversation thread with all messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub project_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<ThreadMessage>,
}

/// Lightweight thread summary (no messages).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub id: String,
    pub project_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

impl From<&Thread> for ThreadSummary {
    fn from(thread: &Thread) -> Self {
        Self {
            id: thread.id.clone(),
            project_id: thread.project_id.clone(),
            created_at: thread.created_at,
            updated_at: thread.updated_at,
            message_count: thread.messages.len(),
        }
    }
}

/// Filtering options for [`ThreadStore::list_messages`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageFilter {
    /// Exclude tool messages and strip tool_calls from assistant messages.
    pub hide_tool_messages: bool,
    /// Return only the most recent assistant message.
    pub only_latest_assistant: bool,
}

/// File-based thread store — one JSON file per thread.
pub struct ThreadStore {
    dir: PathBuf,
}

impl ThreadStore {
    /// Create a new thread store, ensuring the storage directory exists.
    pub fn new(data_dir: &Path) -> Result<Self> {
        let dir = data_dir.join("threads");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create thread dir: {}", dir.display()))?;
        info!(path = %dir.display(), "thread store initialized");
        Ok(Self { dir })
    }

    fn thread_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Create a new empty thread in a project.
    pub fn create(&self, project_id: &str) -> Result<Thread> {
        let now = Utc::now();
        let thread = Thread {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        };
        self.save(&thread)?;
        info!(id = %thread.id, project = %project_id, "thread created");
        Ok(thread)
    }

    /// Get a full thread by ID.
    pub fn get(&self, id: &str) -> Result<Option<Thread>> {
        let path = self.thread_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read thread: {}", id))?;
        let thread = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse thread: {}", id))?;
        Ok(Some(thread))
    }

    /// List all threads sorted by updated_at descending.
    pub fn list(&self) -> Result<Vec<ThreadSummary>> {
        let mut summaries = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                match std::fs::read_to_string(&path) {
                    Ok(data) => match serde_json::from_str::<Thread>(&data) {
                        Ok(thread) => summaries.push(ThreadSummary::from(&thread)),
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "skipping corrupt thread");
                        }
                    },
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed to read thread");
                    }
                }
            }
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    /// Append a message. A new user message first triggers the repair
    /// routine; image attachments are normalized into content parts.
    pub fn append(
        &self,
        id: &str,
        mut message: ThreadMessage,
        images: &[ImageAttachment],
    ) -> Result<Option<Thread>> {
        if message.role == Role::User {
            self.repair_incomplete_tool_calls(id)?;
        }

        let Some(mut thread) = self.get(id)? else {
            return Ok(None);
        };

        if !images.is_empty() {
            let mut parts = match message.content {
                MessageContent::Text(text) => vec![ContentPart::Text { text }],
                MessageContent::Parts(parts) => parts,
            };
            parts.extend(images.iter().map(ImageAttachment::to_part));
            message.content = MessageContent::Parts(parts);
        }

        thread.messages.push(message);
        thread.updated_at = Utc::now();
        self.save(&thread)?;
        Ok(Some(thread))
    }

    /// Rewrite the most recent assistant message in place.
    pub fn update_last_assistant(&self, id: &str, message: ThreadMessage) -> Result<Option<Thread>> {
        let Some(mut thread) = self.get(id)? else {
            return Ok(None);
        };
        if let Some(last) = thread
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.role == Role::Assistant)
        {
            *last = message;
            thread.updated_at = Utc::now();
            self.save(&thread)?;
        }
        Ok(Some(thread))
    }

    /// Retrieve messages with optional filtering.
    pub fn list_messages(&self, id: &str, filter: MessageFilter) -> Result<Vec<ThreadMessage>> {
        let Some(thread) = self.get(id)? else {
            return Ok(Vec::new());
        };

        if filter.only_latest_assistant {
            return Ok(thread
                .messages
                .into_iter()
                .rev()
                .find(|m| m.role == Role::Assistant)
                .into_iter()
                .collect());
        }

        let mut messages = thread.messages;
        if filter.hide_tool_messages {
            messages.retain(|m| m.role != Role::Tool);
            for message in &mut messages {
                message.tool_calls = None;
            }
        }
        Ok(messages)
    }

    /// Restore the assistant/tool pairing invariant: for the last assistant
    /// message carrying tool calls, any call without a subsequent tool
    /// response gets a synthesized placeholder response inserted after the
    /// existing ones. Returns true if a repair was performed.
    pub fn repair_incomplete_tool_calls(&self, id: &str) -> Result<bool> {
        let Some(mut thread) = self.get(id)? else {
            return Ok(false);
        };

        let Some(assistant_index) = thread
            .messages
            .iter()
            .rposition(|m| m.role == Role::Assistant && m.tool_call_count() > 0)
        else {
            return Ok(false);
        };

        let tool_calls = thread.messages[assistant_index]
            .tool_calls
            .clone()
            .unwrap_or_default();
        let responded: Vec<String> = thread.messages[assistant_index + 1..]
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.clone())
            .collect();

        let placeholder =
            ToolResult::error("Execution interrupted. Session was stopped.").to_string();
        let missing: Vec<ThreadMessage> = tool_calls
            .iter()
            .filter(|call| !responded.contains(&call.id))
            .map(|call| {
                ThreadMessage::tool_response(
                    call.id.clone(),
                    call.function.name.clone(),
                    placeholder.clone(),
                )
            })
            .collect();

        if missing.is_empty() {
            return Ok(false);
        }

        warn!(
            thread = %id,
            missing = missing.len(),
            "repairing incomplete tool calls"
        );

        // Insert directly after the assistant message and its existing
        // tool responses, before any later message.
        let insert_at = assistant_index + 1 + responded.len();
        for (offset, message) in missing.into_iter().enumerate() {
            thread.messages.insert(insert_at + offset, message);
        }
        thread.updated_at = Utc::now();
        self.save(&thread)?;
        Ok(true)
    }

    /// Delete a thread.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let path = self.thread_path(id);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)
            .with_context(|| format!("failed to delete thread: {}", id))?;
        info!(id = %id, "thread deleted");
        Ok(true)
    }

    fn save(&self, thread: &Thread) -> Result<()> {
        let path = self.thread_path(&thread.id);
        let data = serde_json::to_string_pretty(thread)?;
        std::fs::write(&path, data)
            .with_context(|| format!("failed to write thread: {}", thread.id))?;
        Ok(())
    }
}

#[async_trait]
impl MessageSink for ThreadStore {
    async fn append_message(&self, thread_id: &str, message: ThreadMessage) -> Result<(), SinkError> {
        match self.append(thread_id, message, &[]) {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(SinkError::ThreadNotFound(thread_id.to_string())),
            Err(e) => Err(SinkError::Persist(e.to_string())),
        }
    }
}
