use async_trait::async_trait;

use dirigent_core::ThreadMessage;

/// Destination for messages produced while processing a response.
///
/// Defined here by the consumer (the response processor); the thread store
/// crate provides the durable implementation.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Append a message to a thread.
    async fn append_message(&self, thread_id: &str, message: ThreadMessage) -> Result<(), SinkError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("thread not found: {0}")]
    ThreadNotFound(String),
    #[error("persist failed: {0}")]
    Persist(String),
}

/// In-memory sink for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemorySink {
        messages: Mutex<HashMap<String, Vec<ThreadMessage>>>,
    }

    impl MemorySink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn messages(&self, thread_id: &str) -> Vec<ThreadMessage> {
            self.messages
                .lock()
                .unwrap()
                .get(thread_id)
                .cloned()
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl MessageSink for MemorySink {
        async fn append_message(&self, thread_id: &str, message: ThreadMessage) -> Result<(), SinkError> {
            self.messages
                .lock()
                .unwrap()
                .entry(thread_id.to_string())
                .or_default()
                .push(message);
            Ok(())
        }
    }
}
