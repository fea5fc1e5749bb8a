//! Tool execution engine: name resolution, invocation, and composition
//! under sequential or parallel strategies. Execution never raises — every
//! failure becomes a `ToolResult` with `success=false`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::registry::ToolRegistry;
use crate::tool::{ToolCall, ToolResult};

/// How multiple tool calls are composed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// One after another, in input order; a failure does not block later calls.
    #[default]
    Sequential,
    /// All launched concurrently; results keep input order.
    Parallel,
}

/// Resolves calls against the registry and runs them.
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Execute a single call. Unknown functions and tool errors are
    /// reported as failed results, never as Err.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let arguments = normalize_arguments(call.arguments.clone());
        debug!(function = %call.function_name, "executing tool");

        let Some(function) = self.registry.get(&call.function_name) else {
            warn!(function = %call.function_name, "tool function not found in registry");
            return ToolResult::error(format!(
                "Tool function '{}' not found",
                call.function_name
            ));
        };

        match function.invoke(arguments).await {
            Ok(result) => result,
            Err(e) => {
                warn!(function = %call.function_name, error = %e, "tool execution failed");
                ToolResult::error(format!("Error executing tool: {e}"))
            }
        }
    }

    /// Execute a batch of calls under the given strategy, returning
    /// `(call, result)` pairs in input order.
    pub async fn execute_many(
        &self,
        calls: Vec<ToolCall>,
        strategy: ExecutionStrategy,
    ) -> Vec<(ToolCall, ToolResult)> {
        if calls.is_empty() {
            return Vec::new();
        }
        info!(count = calls.len(), ?strategy, "executing tool calls");

        match strategy {
            ExecutionStrategy::Sequential => {
                let mut results = Vec::with_capacity(calls.len());
                for call in calls {
                    let result = self.execute(&call).await;
                    results.push((call, result));
                }
                results
            }
            ExecutionStrategy::Parallel => {
                let futures = calls.iter().map(|call| self.execute(call));
                let results = futures::future::join_all(futures).await;
                calls.into_iter().zip(results).collect()
            }
        }
    }
}

/// Arguments that arrive as a raw string (e.g. a malformed fragment) are
/// parsed as JSON when possible, otherwise wrapped as `{"text": value}`.
fn normalize_arguments(arguments: Value) -> Value {
    match arguments {
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(parsed @ Value::Object(_)) => parsed,
            _ => serde_json::json!({ "text": s }),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{EchoTool, Tool, ToolError, ToolSchema};
    use async_trait::async_trait;

    /// Tool whose execution always errors, for failure-isolation tests.
    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn schemas(&self) -> Vec<ToolSchema> {
            vec![ToolSchema {
                name: "always_fail".to_string(),
                definition: serde_json::json!({
                    "type": "function",
                    "function": {"name": "always_fail", "parameters": {"type": "object"}}
                }),
                markup: None,
            }]
        }

        async fn invoke(&self, _method: &str, _args: serde_json::Value) -> Result<ToolResult, ToolError> {
            Err(ToolError::ExecutionFailed("deliberate failure".to_string()))
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        registry.register(FailingTool).unwrap();
        ToolExecutor::new(Arc::new(registry))
    }

    fn echo_call(message: &str) -> ToolCall {
        ToolCall::structured(
            uuid::Uuid::new_v4().to_string(),
            "echo",
            serde_json::json!({"message": message}),
        )
    }

    #[tokio::test]
    async fn unknown_function_yields_failed_result() {
        let result = executor()
            .execute(&ToolCall::structured("c1", "missing", serde_json::json!({})))
            .await;
        assert!(!result.success);
        assert_eq!(result.output_text(), "Tool function 'missing' not found");
    }

    #[tokio::test]
    async fn tool_error_is_wrapped_not_raised() {
        let result = executor()
            .execute(&ToolCall::structured("c1", "always_fail", serde_json::json!({})))
            .await;
        assert!(!result.success);
        assert!(result.output_text().contains("deliberate failure"));
    }

    #[tokio::test]
    async fn string_arguments_are_wrapped() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        let executor = ToolExecutor::new(Arc::new(registry));

        // Non-JSON string becomes {"text": …} and echo then misses its field.
        let result = executor
            .execute(&ToolCall::structured(
                "c1",
                "echo",
                serde_json::Value::String("not json".to_string()),
            ))
            .await;
        assert!(!result.success);

        // A JSON object in string form is parsed and used directly.
        let result = executor
            .execute(&ToolCall::structured(
                "c2",
                "echo",
                serde_json::Value::String(r#"{"message": "parsed"}"#.to_string()),
            ))
            .await;
        assert!(result.success);
        assert_eq!(result.output_text(), "parsed");
    }

    #[tokio::test]
    async fn sequential_preserves_order_and_isolates_failure() {
        let executor = executor();
        let calls = vec![
            echo_call("one"),
            ToolCall::structured("f", "always_fail", serde_json::json!({})),
            echo_call("three"),
        ];
        let results = executor.execute_many(calls, ExecutionStrategy::Sequential).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].1.output_text(), "one");
        assert!(!results[1].1.success);
        assert_eq!(results[2].1.output_text(), "three");
    }

    #[tokio::test]
    async fn parallel_matches_sequential_results() {
        let executor = executor();
        let calls: Vec<ToolCall> = (0..5).map(|i| echo_call(&format!("msg-{i}"))).collect();

        let sequential = executor
            .execute_many(calls.clone(), ExecutionStrategy::Sequential)
            .await;
        let parallel = executor
            .execute_many(calls, ExecutionStrategy::Parallel)
            .await;

        let seq_outputs: Vec<String> = sequential.iter().map(|(_, r)| r.output_text()).collect();
        let par_outputs: Vec<String> = parallel.iter().map(|(_, r)| r.output_text()).collect();
        assert_eq!(seq_outputs, par_outputs);
    }
}
