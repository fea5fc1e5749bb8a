//! In-memory event log for a live run.
//!
//! Mutated only by the run's supervisor task; stream readers observe it
//! read-only by length-then-index. Appends never mutate existing entries,
//! so concurrent readers are safe.

use serde_json::Value;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct RunLog {
    entries: RwLock<Vec<Value>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, event: Value) {
        self.entries.write().await.push(event);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Entries from `start` onward (a snapshot).
    pub async fn entries_from(&self, start: usize) -> Vec<Value> {
        let entries = self.entries.read().await;
        if start >= entries.len() {
            return Vec::new();
        }
        entries[start..].to_vec()
    }

    /// A full snapshot of the log.
    pub async fn snapshot(&self) -> Vec<Value> {
        self.entries.read().await.clone()
    }
}
