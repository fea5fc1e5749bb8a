use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

use dirigent_core::{ThreadMessage, ToolCallRecord};

/// One streaming chunk from the LM: an optional delta plus an optional
/// finish reason (typically only on the last chunk).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionChunk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<ChunkDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl CompletionChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            delta: Some(ChunkDelta {
                content: Some(content.into()),
                tool_calls: Vec::new(),
            }),
            finish_reason: None,
        }
    }

    pub fn tool_calls(deltas: Vec<ToolCallDelta>) -> Self {
        Self {
            delta: Some(ChunkDelta {
                content: None,
                tool_calls: deltas,
            }),
            finish_reason: None,
        }
    }

    pub fn finish(reason: impl Into<String>) -> Self {
        Self {
            delta: None,
            finish_reason: Some(reason.into()),
        }
    }
}

/// The delta payload of a chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallDelta>,
}

/// A structured tool-call fragment. `index` groups fragments belonging to
/// one call across chunks; the remaining fields are partial.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl ToolCallDelta {
    /// Fragment carrying id + name (the usual first fragment of a call).
    pub fn start(index: u32, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            index,
            id: Some(id.into()),
            kind: Some("function".to_string()),
            function: Some(FunctionDelta {
                name: Some(name.into()),
                arguments: None,
            }),
        }
    }

    /// Fragment carrying only argument text.
    pub fn arguments(index: u32, fragment: impl Into<String>) -> Self {
        Self {
            index,
            id: None,
            kind: None,
            function: Some(FunctionDelta {
                name: None,
                arguments: Some(fragment.into()),
            }),
        }
    }
}

/// A complete (non-streaming) LM response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<CompletionChunk, ProviderError>> + Send>>;

/// Trait for LM clients that produce completion chunks.
///
/// This trait lives in tool-runtime (not in a provider crate) because it is
/// defined by the consumer (the response processor), not the provider.
#[async_trait]
pub trait ChunkProvider: Send + Sync {
    /// Stream a completion with tool definitions available.
    async fn stream_completion(
        &self,
        messages: Vec<ThreadMessage>,
        tools: Vec<Value>,
    ) -> Result<ChunkStream, ProviderError>;

    /// Single-shot completion.
    async fn complete(
        &self,
        messages: Vec<ThreadMessage>,
        tools: Vec<Value>,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Provider name for logging/debugging (e.g. "openai", "anthropic").
    fn provider_name(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Stream error: {0}")]
    StreamError(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Mock chunk provider for testing the processor without real API calls.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use futures::stream;
    use std::sync::Mutex;

    /// Returns pre-configured chunk sequences and completions.
    pub struct MockChunkProvider {
        streams: Mutex<Vec<Vec<CompletionChunk>>>,
        completions: Mutex<Vec<CompletionResponse>>,
    }

    impl MockChunkProvider {
        pub fn new() -> Self {
            Self {
                streams: Mutex::new(Vec::new()),
                completions: Mutex::new(Vec::new()),
            }
        }

        /// Queue a chunk sequence for the next `stream_completion` call.
        pub fn queue_chunks(&self, chunks: Vec<CompletionChunk>) {
            self.streams.lock().unwrap().push(chunks);
        }

        /// Queue a plain text response split into word-sized deltas.
        pub fn queue_text(&self, text: &str) {
            let mut chunks: Vec<CompletionChunk> = text
                .split_inclusive(' ')
                .map(CompletionChunk::text)
                .collect();
            chunks.push(CompletionChunk::finish("stop"));
            self.queue_chunks(chunks);
        }

        /// Queue a complete response for the next `complete` call.
        pub fn queue_completion(&self, response: CompletionResponse) {
            self.completions.lock().unwrap().push(response);
        }
    }

    impl Default for MockChunkProvider {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ChunkProvider for MockChunkProvider {
        async fn stream_completion(
            &self,
            _messages: Vec<ThreadMessage>,
            _tools: Vec<Value>,
        ) -> Result<ChunkStream, ProviderError> {
            let chunks = self
                .streams
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| vec![CompletionChunk::finish("stop")]);
            Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))))
        }

        async fn complete(
            &self,
            _messages: Vec<ThreadMessage>,
            _tools: Vec<Value>,
        ) -> Result<CompletionResponse, ProviderError> {
            Ok(self
                .completions
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_default())
        }

        fn provider_name(&self) -> &str {
            "mock"
        }
    }
}
