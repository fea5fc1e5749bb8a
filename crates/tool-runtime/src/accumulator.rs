//! Reassembly of structured tool calls from streaming fragments.
//!
//! Structured calls arrive as indexed deltas spread across chunks. The
//! accumulator keeps one partial record per index, overwrites id/name when
//! a fragment provides them (never clears), appends argument text, and
//! considers a record complete once id, name, and JSON-parseable arguments
//! are all present.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;
use tracing::warn;

use crate::provider::ToolCallDelta;
use crate::tool::ToolCall;
use dirigent_core::ToolCallRecord;

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl PartialCall {
    fn parsed_arguments(&self) -> Option<Value> {
        if self.id.is_none() || self.name.is_none() || self.arguments.is_empty() {
            return None;
        }
        serde_json::from_str(&self.arguments).ok()
    }
}

/// Accumulates indexed tool-call fragments into complete calls.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    partials: BTreeMap<u32, PartialCall>,
    emitted: HashSet<u32>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one fragment. Returns the assembled call the first time the
    /// record at that index becomes complete, and never again for the same
    /// index.
    pub fn apply(&mut self, delta: &ToolCallDelta) -> Option<ToolCall> {
        let partial = self.partials.entry(delta.index).or_insert_with(|| PartialCall {
            // A call with no LM-assigned id gets a synthesized one; a later
            // fragment carrying the real id overwrites it.
            id: delta
                .id
                .clone()
                .or_else(|| Some(uuid::Uuid::new_v4().to_string())),
            name: None,
            arguments: String::new(),
        });

        if let Some(id) = &delta.id {
            partial.id = Some(id.clone());
        }
        if let Some(function) = &delta.function {
            if let Some(name) = &function.name {
                partial.name = Some(name.clone());
            }
            if let Some(fragment) = &function.arguments {
                partial.arguments.push_str(fragment);
            }
        }

        if self.emitted.contains(&delta.index) {
            return None;
        }
        let arguments = partial.parsed_arguments()?;
        self.emitted.insert(delta.index);
        Some(ToolCall::structured(
            partial.id.clone().unwrap_or_default(),
            partial.name.clone().unwrap_or_default(),
            arguments,
        ))
    }

    /// All complete records in native wire shape (raw argument text), for
    /// the assistant message's tool_calls field.
    pub fn completed_records(&self) -> Vec<ToolCallRecord> {
        self.partials
            .values()
            .filter(|p| p.parsed_arguments().is_some())
            .map(|p| {
                ToolCallRecord::new(
                    p.id.clone().unwrap_or_default(),
                    p.name.clone().unwrap_or_default(),
                    p.arguments.clone(),
                )
            })
            .collect()
    }

    /// All complete calls with parsed arguments, in index order.
    pub fn completed_calls(&self) -> Vec<ToolCall> {
        self.partials
            .values()
            .filter_map(|p| {
                let arguments = p.parsed_arguments()?;
                Some(ToolCall::structured(
                    p.id.clone().unwrap_or_default(),
                    p.name.clone().unwrap_or_default(),
                    arguments,
                ))
            })
            .collect()
    }

    /// Number of records that never completed; logged at stream end.
    pub fn finish(&self) -> usize {
        let incomplete = self
            .partials
            .values()
            .filter(|p| p.parsed_arguments().is_none())
            .count();
        if incomplete > 0 {
            warn!(incomplete, "dropping incomplete structured tool calls at stream end");
        }
        incomplete
    }
}
