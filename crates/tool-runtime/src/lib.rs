pub mod accumulator;
pub mod events;
pub mod executor;
pub mod markup;
pub mod processor;
pub mod provider;
pub mod registry;
pub mod sink;
pub mod tool;
pub mod tools;

pub use accumulator::ToolCallAccumulator;
pub use events::{ProcessorEvent, ToolStatusKind};
pub use executor::{ExecutionStrategy, ToolExecutor};
pub use markup::{MarkupMapping, MarkupSchema, MappingKind};
pub use processor::{ProcessorConfig, ProcessorError, ResponseProcessor, ResultPlacement};
pub use provider::{ChunkProvider, ChunkStream, CompletionChunk, CompletionResponse, ProviderError};
pub use registry::{RegistryError, ToolRegistry};
pub use sink::{MessageSink, SinkError};
pub use tool::{Tool, ToolCall, ToolError, ToolResult, ToolSchema};
pub use tools::MessageTool;
