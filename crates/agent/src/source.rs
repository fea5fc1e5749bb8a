use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use dirigent_thread::{MessageFilter, ThreadStore};
use dirigent_tool_runtime::{
    ChunkProvider, ProcessorConfig, ProcessorEvent, ResponseProcessor, ToolRegistry,
};

use crate::controller::RunError;

pub type EventStream = Pin<Box<dyn Stream<Item = ProcessorEvent> + Send>>;

/// The host agent loop boundary: produces the event stream for one run
/// against a thread. The server wires this to the response processor; tests
/// use scripted sources.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn run(&self, thread_id: &str) -> Result<EventStream, RunError>;
}

/// Event source backed by an LM chunk provider and the response processor:
/// one completion per run, with tool calls parsed and executed per the
/// processor config.
pub struct ProcessorEventSource {
    provider: Arc<dyn ChunkProvider>,
    processor: Arc<ResponseProcessor>,
    registry: Arc<ToolRegistry>,
    threads: Arc<ThreadStore>,
    config: ProcessorConfig,
}

impl ProcessorEventSource {
    pub fn new(
        provider: Arc<dyn ChunkProvider>,
        registry: Arc<ToolRegistry>,
        threads: Arc<ThreadStore>,
        config: ProcessorConfig,
    ) -> Self {
        let processor = Arc::new(ResponseProcessor::new(registry.clone(), threads.clone()));
        Self {
            provider,
            processor,
            registry,
            threads,
            config,
        }
    }
}

#[async_trait]
impl EventSource for ProcessorEventSource {
    async fn run(&self, thread_id: &str) -> Result<EventStream, RunError> {
        let messages = self
            .threads
            .list_messages(thread_id, MessageFilter::default())?;
        let tools = self.registry.function_definitions();

        let chunks = self
            .provider
            .stream_completion(messages, tools)
            .await
            .map_err(|e| RunError::Source(e.to_string()))?;

        let (tx, rx) = mpsc::channel::<ProcessorEvent>(256);
        let processor = self.processor.clone();
        let config = self.config.clone();
        let thread_id = thread_id.to_string();
        tokio::spawn(async move {
            // Fatal processor errors were already surfaced as error events.
            if let Err(e) = processor
                .process_stream(chunks, &thread_id, &config, &tx)
                .await
            {
                warn!(thread = %thread_id, error = %e, "response processing failed");
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirigent_core::Role;
    use dirigent_tool_runtime::provider::mock::MockChunkProvider;
    use dirigent_tool_runtime::MessageTool;
    use futures::StreamExt;
    use tempfile::TempDir;

    #[tokio::test]
    async fn processor_source_streams_and_persists() {
        let dir = TempDir::new().unwrap();
        let threads = Arc::new(ThreadStore::new(dir.path()).unwrap());
        let thread = threads.create("p").unwrap();

        let mut registry = ToolRegistry::new();
        registry.register(MessageTool).unwrap();

        let provider = Arc::new(MockChunkProvider::new());
        provider.queue_chunks(vec![
            dirigent_tool_runtime::CompletionChunk::text(
                "<message-notify-user>All done</message-notify-user>",
            ),
            dirigent_tool_runtime::CompletionChunk::finish("stop"),
        ]);

        let source = ProcessorEventSource::new(
            provider,
            Arc::new(registry),
            threads.clone(),
            ProcessorConfig::default(),
        );

        let mut stream = source.run(&thread.id).await.unwrap();
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }

        assert!(matches!(events.first(), Some(ProcessorEvent::Content { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, ProcessorEvent::ToolResult { .. })));
        assert!(matches!(events.last(), Some(ProcessorEvent::Finish { .. })));

        let stored = threads.get(&thread.id).unwrap().unwrap();
        assert_eq!(stored.messages.len(), 2);
        assert_eq!(stored.messages[0].role, Role::Assistant);
        assert!(stored.messages[1]
            .content
            .as_text()
            .contains("NOTIFICATION: All done"));
    }
}
