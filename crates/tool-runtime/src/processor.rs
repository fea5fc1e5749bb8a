//! Response processing: drives an LM chunk stream, extracts markup and
//! structured tool calls, schedules execution, and multiplexes parser
//! output, execution status, and results into one event stream while
//! persisting the authoritative record through a [`MessageSink`].

use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use dirigent_core::{ThreadMessage, ToolCallRecord};

use crate::accumulator::ToolCallAccumulator;
use crate::events::{self, ProcessorEvent};
use crate::executor::{ExecutionStrategy, ToolExecutor};
use crate::markup;
use crate::provider::{ChunkStream, CompletionResponse, ProviderError};
use crate::registry::ToolRegistry;
use crate::sink::{MessageSink, SinkError};
use crate::tool::{ToolCall, ToolResult};

/// Finish reason reported when the markup tool-call cap stops a response.
pub const MARKUP_LIMIT_REASON: &str = "markup_tool_limit_reached";

/// Where markup-origin tool results are placed in the thread.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultPlacement {
    /// Result appears as external input to the model.
    UserMessage,
    #[default]
    AssistantMessage,
    /// Reserved; behaves as `AssistantMessage`.
    InlineEdit,
}

/// Configuration for response processing and tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Detect markup tool calls embedded in prose.
    pub markup_tool_calling: bool,
    /// Detect structured (function-calling) tool calls.
    pub structured_tool_calling: bool,
    /// Execute detected calls at all.
    pub execute_tools: bool,
    /// Dispatch execution as soon as a call completes mid-stream, instead
    /// of deferring until stream end.
    pub execute_on_stream: bool,
    pub tool_execution_strategy: ExecutionStrategy,
    pub markup_result_placement: ResultPlacement,
    /// Maximum markup calls per response; 0 means no limit.
    pub max_markup_tool_calls: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            markup_tool_calling: true,
            structured_tool_calling: false,
            execute_tools: true,
            execute_on_stream: false,
            tool_execution_strategy: ExecutionStrategy::Sequential,
            markup_result_placement: ResultPlacement::AssistantMessage,
            max_markup_tool_calls: 0,
        }
    }
}

impl ProcessorConfig {
    pub fn validate(&self) -> Result<(), ProcessorError> {
        if self.execute_tools && !self.markup_tool_calling && !self.structured_tool_calling {
            return Err(ProcessorError::InvalidConfig(
                "at least one tool calling format (markup or structured) must be enabled when execute_tools is set"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn markup_capacity_left(&self, used: usize) -> bool {
        self.max_markup_tool_calls == 0 || used < self.max_markup_tool_calls
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("invalid processor config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("store error: {0}")]
    Store(#[from] SinkError),
    #[error("event serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("event channel closed by receiver")]
    ChannelClosed,
}

/// A tool execution in flight, launched mid-stream.
struct PendingExecution {
    call: ToolCall,
    tool_index: u64,
    handle: JoinHandle<ToolResult>,
}

/// Processes LM responses, extracting and executing tool calls.
pub struct ResponseProcessor {
    registry: Arc<ToolRegistry>,
    executor: ToolExecutor,
    sink: Arc<dyn MessageSink>,
}

impl ResponseProcessor {
    pub fn new(registry: Arc<ToolRegistry>, sink: Arc<dyn MessageSink>) -> Self {
        let executor = ToolExecutor::new(registry.clone());
        Self { registry, executor, sink }
    }

    /// Process a streaming response. Events are delivered through `tx` as
    /// they occur; a fatal error is also surfaced as an `error` event
    /// before it is returned.
    pub async fn process_stream(
        &self,
        chunks: ChunkStream,
        thread_id: &str,
        config: &ProcessorConfig,
        tx: &mpsc::Sender<ProcessorEvent>,
    ) -> Result<(), ProcessorError> {
        config.validate()?;
        match self.run_stream(chunks, thread_id, config, tx).await {
            Ok(()) => Ok(()),
            Err(ProcessorError::ChannelClosed) => Err(ProcessorError::ChannelClosed),
            Err(e) => {
                let _ = tx.send(ProcessorEvent::error(e.to_string())).await;
                Err(e)
            }
        }
    }

    async fn run_stream(
        &self,
        mut chunks: ChunkStream,
        thread_id: &str,
        config: &ProcessorConfig,
        tx: &mpsc::Sender<ProcessorEvent>,
    ) -> Result<(), ProcessorError> {
        let mut accumulated_content = String::new();
        let mut markup_buffer = String::new();
        let mut accumulator = ToolCallAccumulator::new();
        let mut deferred: Vec<ToolCall> = Vec::new();
        let mut pending: Vec<PendingExecution> = Vec::new();
        let mut results_buffer: Vec<(ToolCall, ToolResult)> = Vec::new();
        let mut tool_index: u64 = 0;
        let mut markup_call_count = 0usize;
        let mut finish_reason: Option<String> = None;

        let markup_tags = self.registry.markup_tags();

        info!(
            thread = thread_id,
            markup = config.markup_tool_calling,
            structured = config.structured_tool_calling,
            on_stream = config.execute_on_stream,
            "processing streaming response"
        );

        'stream: while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;

            if let Some(reason) = chunk.finish_reason {
                debug!(reason = %reason, "finish reason detected");
                finish_reason = Some(reason);
            }

            if let Some(delta) = chunk.delta {
                if let Some(text) = delta.content {
                    accumulated_content.push_str(&text);
                    markup_buffer.push_str(&text);
                    send(tx, ProcessorEvent::content(text)).await?;

                    if config.markup_tool_calling && config.markup_capacity_left(markup_call_count) {
                        for block in markup::drain_blocks(&mut markup_buffer, &markup_tags) {
                            if !config.markup_capacity_left(markup_call_count) {
                                break;
                            }
                            let call = match self.parse_markup_block(&block) {
                                Ok(call) => call,
                                Err(message) => {
                                    send(tx, ProcessorEvent::error(message)).await?;
                                    continue;
                                }
                            };
                            markup_call_count += 1;

                            if config.execute_tools && config.execute_on_stream {
                                self.dispatch(call, &mut tool_index, &mut pending, tx).await?;
                            } else {
                                deferred.push(call);
                            }

                            if !config.markup_capacity_left(markup_call_count) {
                                info!(
                                    limit = config.max_markup_tool_calls,
                                    "markup tool call limit reached, stopping stream"
                                );
                                finish_reason = Some(MARKUP_LIMIT_REASON.to_string());
                                break;
                            }
                        }
                    }
                }

                if config.structured_tool_calling && !delta.tool_calls.is_empty() {
                    for fragment in &delta.tool_calls {
                        send(tx, ProcessorEvent::tool_call_fragment(serde_json::to_value(fragment)?))
                            .await?;
                        if let Some(call) = accumulator.apply(fragment) {
                            if config.execute_tools && config.execute_on_stream {
                                self.dispatch(call, &mut tool_index, &mut pending, tx).await?;
                            }
                        }
                    }
                }
            }

            if finish_reason.as_deref() == Some(MARKUP_LIMIT_REASON) {
                break 'stream;
            }

            self.drain_finished(&mut pending, &mut results_buffer, tx).await?;
        }

        // Stream exhausted (or cap-stopped): wait out every in-flight execution.
        for execution in pending.drain(..) {
            match execution.handle.await {
                Ok(result) => {
                    send(tx, ProcessorEvent::tool_finished(&execution.call, &result, execution.tool_index))
                        .await?;
                    send(tx, ProcessorEvent::tool_result(&execution.call, &result, execution.tool_index))
                        .await?;
                    results_buffer.push((execution.call, result));
                }
                Err(e) => {
                    send(tx, ProcessorEvent::tool_error(&execution.call, &e, execution.tool_index))
                        .await?;
                }
            }
        }

        accumulator.finish();

        let records = if config.structured_tool_calling {
            accumulator.completed_records()
        } else {
            Vec::new()
        };

        if !accumulated_content.is_empty() || !records.is_empty() {
            // The assistant message is persisted before any tool result
            // that cites it.
            let assistant =
                ThreadMessage::assistant_with_tool_calls(accumulated_content.clone(), records);
            self.sink.append_message(thread_id, assistant).await?;

            for (call, result) in &results_buffer {
                self.persist_tool_result(thread_id, call, result, config).await?;
            }

            if config.execute_tools && !config.execute_on_stream {
                let mut to_execute: Vec<ToolCall> = Vec::new();
                if config.structured_tool_calling {
                    to_execute.extend(accumulator.completed_calls());
                }
                if config.markup_tool_calling {
                    // Blocks that completed exactly at stream end.
                    for block in markup::drain_blocks(&mut markup_buffer, &markup_tags) {
                        if !config.markup_capacity_left(markup_call_count) {
                            break;
                        }
                        if let Ok(call) = self.parse_markup_block(&block) {
                            markup_call_count += 1;
                            deferred.push(call);
                        }
                    }
                    to_execute.append(&mut deferred);
                }

                let pairs = self
                    .executor
                    .execute_many(to_execute, config.tool_execution_strategy)
                    .await;
                for (call, result) in pairs {
                    self.persist_tool_result(thread_id, &call, &result, config).await?;
                    send(tx, ProcessorEvent::tool_result(&call, &result, tool_index)).await?;
                    tool_index += 1;
                }
            }
        }

        if let Some(reason) = finish_reason {
            send(tx, ProcessorEvent::finish(reason)).await?;
        }

        Ok(())
    }

    /// Process a complete (non-streaming) response under the same event
    /// and persistence contract as the streaming path.
    pub async fn process_complete(
        &self,
        response: CompletionResponse,
        thread_id: &str,
        config: &ProcessorConfig,
        tx: &mpsc::Sender<ProcessorEvent>,
    ) -> Result<(), ProcessorError> {
        config.validate()?;
        match self.run_complete(response, thread_id, config, tx).await {
            Ok(()) => Ok(()),
            Err(ProcessorError::ChannelClosed) => Err(ProcessorError::ChannelClosed),
            Err(e) => {
                let _ = tx.send(ProcessorEvent::error(e.to_string())).await;
                Err(e)
            }
        }
    }

    async fn run_complete(
        &self,
        response: CompletionResponse,
        thread_id: &str,
        config: &ProcessorConfig,
        tx: &mpsc::Sender<ProcessorEvent>,
    ) -> Result<(), ProcessorError> {
        let content = response.content.unwrap_or_default();
        let mut finish_reason = response.finish_reason;
        let mut tool_index: u64 = 0;
        let mut calls: Vec<ToolCall> = Vec::new();

        if config.markup_tool_calling && !content.is_empty() {
            let mut buffer = content.clone();
            let mut markup_calls = Vec::new();
            for block in markup::drain_blocks(&mut buffer, &self.registry.markup_tags()) {
                match self.parse_markup_block(&block) {
                    Ok(call) => markup_calls.push(call),
                    Err(message) => send(tx, ProcessorEvent::error(message)).await?,
                }
            }
            if config.max_markup_tool_calls > 0 && markup_calls.len() > config.max_markup_tool_calls {
                info!(
                    found = markup_calls.len(),
                    limit = config.max_markup_tool_calls,
                    "truncating markup tool calls to limit"
                );
                markup_calls.truncate(config.max_markup_tool_calls);
                finish_reason = Some(MARKUP_LIMIT_REASON.to_string());
            }
            calls.extend(markup_calls);
        }

        let mut records: Vec<ToolCallRecord> = Vec::new();
        if config.structured_tool_calling {
            for record in &response.tool_calls {
                records.push(record.clone());
                match serde_json::from_str(&record.function.arguments) {
                    Ok(arguments) => calls.push(ToolCall::structured(
                        record.id.clone(),
                        record.function.name.clone(),
                        arguments,
                    )),
                    Err(e) => {
                        warn!(id = %record.id, error = %e, "dropping tool call with unparseable arguments");
                        send(
                            tx,
                            ProcessorEvent::error(format!(
                                "unparseable arguments for tool call {}",
                                record.id
                            )),
                        )
                        .await?;
                    }
                }
            }
        }

        let assistant = ThreadMessage::assistant_with_tool_calls(content.clone(), records);
        self.sink.append_message(thread_id, assistant).await?;

        send(tx, ProcessorEvent::content(content)).await?;

        if config.execute_tools && !calls.is_empty() {
            let pairs = self
                .executor
                .execute_many(calls, config.tool_execution_strategy)
                .await;
            for (call, result) in pairs {
                self.persist_tool_result(thread_id, &call, &result, config).await?;
                send(tx, ProcessorEvent::tool_result(&call, &result, tool_index)).await?;
                tool_index += 1;
            }
        }

        if let Some(reason) = finish_reason {
            send(tx, ProcessorEvent::finish(reason)).await?;
        }

        Ok(())
    }

    /// Parse one drained block against its registered schema.
    fn parse_markup_block(&self, block: &str) -> Result<ToolCall, String> {
        let tag = markup::block_tag(block)
            .ok_or_else(|| format!("markup block has no recognizable tag: {block}"))?;
        let function = self
            .registry
            .get_markup(tag)
            .ok_or_else(|| format!("no tool registered for markup tag '{tag}'"))?;
        let schema = function
            .markup
            .as_ref()
            .ok_or_else(|| format!("tool '{}' has no markup schema", function.name))?;

        let arguments = schema
            .parse_arguments(block)
            .map_err(|e| format!("failed to parse <{tag}> block: {e}"))?;

        Ok(ToolCall::from_markup(tag, function.name.clone(), serde_json::Value::Object(arguments)))
    }

    /// Assign the next tool index, emit `started`, and launch the execution
    /// as an independent task running concurrently with stream consumption.
    async fn dispatch(
        &self,
        call: ToolCall,
        tool_index: &mut u64,
        pending: &mut Vec<PendingExecution>,
        tx: &mpsc::Sender<ProcessorEvent>,
    ) -> Result<(), ProcessorError> {
        let index = *tool_index;
        *tool_index += 1;

        send(tx, ProcessorEvent::tool_started(&call, index)).await?;

        let executor = self.executor.clone();
        let task_call = call.clone();
        let handle = tokio::spawn(async move { executor.execute(&task_call).await });
        pending.push(PendingExecution { call, tool_index: index, handle });
        Ok(())
    }

    /// Non-blocking poll: emit status + result for any finished executions.
    async fn drain_finished(
        &self,
        pending: &mut Vec<PendingExecution>,
        results_buffer: &mut Vec<(ToolCall, ToolResult)>,
        tx: &mpsc::Sender<ProcessorEvent>,
    ) -> Result<(), ProcessorError> {
        let mut i = 0;
        while i < pending.len() {
            if !pending[i].handle.is_finished() {
                i += 1;
                continue;
            }
            let execution = pending.remove(i);
            match execution.handle.await {
                Ok(result) => {
                    send(tx, ProcessorEvent::tool_finished(&execution.call, &result, execution.tool_index))
                        .await?;
                    send(tx, ProcessorEvent::tool_result(&execution.call, &result, execution.tool_index))
                        .await?;
                    results_buffer.push((execution.call, result));
                }
                Err(e) => {
                    send(tx, ProcessorEvent::tool_error(&execution.call, &e, execution.tool_index))
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Persist one tool result: structured-origin results become `tool`
    /// messages keyed by the LM-assigned call id; markup-origin results are
    /// tag-wrapped and placed per the configured strategy.
    async fn persist_tool_result(
        &self,
        thread_id: &str,
        call: &ToolCall,
        result: &ToolResult,
        config: &ProcessorConfig,
    ) -> Result<(), ProcessorError> {
        let message = match &call.xml_tag_name {
            None => ThreadMessage::tool_response(
                call.id.clone(),
                call.function_name.clone(),
                result.output_text(),
            ),
            Some(_) => {
                let content = events::format_result(call, result);
                match config.markup_result_placement {
                    ResultPlacement::UserMessage => ThreadMessage::user(content),
                    ResultPlacement::AssistantMessage | ResultPlacement::InlineEdit => {
                        ThreadMessage::assistant(content)
                    }
                }
            }
        };
        self.sink.append_message(thread_id, message).await?;
        Ok(())
    }
}

async fn send(tx: &mpsc::Sender<ProcessorEvent>, event: ProcessorEvent) -> Result<(), ProcessorError> {
    tx.send(event).await.map_err(|_| ProcessorError::ChannelClosed)
}
