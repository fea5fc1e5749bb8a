use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::markup::MarkupSchema;
use crate::tool::{Tool, ToolError, ToolResult, ToolSchema};

/// One registered callable: the owning tool plus the schema it was
/// registered under.
#[derive(Clone)]
pub struct RegisteredFunction {
    pub name: String,
    pub definition: Value,
    pub markup: Option<MarkupSchema>,
    tool: Arc<dyn Tool>,
}

impl RegisteredFunction {
    /// Invoke the underlying tool method with the given arguments.
    pub async fn invoke(&self, args: Value) -> Result<ToolResult, ToolError> {
        self.tool.invoke(&self.name, args).await
    }
}

/// Manages available tools, their schemas, and lookup by canonical function
/// name or by markup tag. Thread-safe via Arc wrapping of individual tools.
pub struct ToolRegistry {
    functions: HashMap<String, RegisteredFunction>,
    markup_tags: HashMap<String, String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
            markup_tags: HashMap::new(),
        }
    }

    /// Register a tool, enumerating its declared schemas. Returns an error
    /// if any function name or markup tag is already registered.
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        let tool: Arc<dyn Tool> = Arc::new(tool);
        for schema in tool.schemas() {
            self.register_schema(tool.clone(), schema)?;
        }
        Ok(())
    }

    fn register_schema(&mut self, tool: Arc<dyn Tool>, schema: ToolSchema) -> Result<(), RegistryError> {
        if self.functions.contains_key(&schema.name) {
            return Err(RegistryError::DuplicateName(schema.name));
        }
        if let Some(markup) = &schema.markup {
            if self.markup_tags.contains_key(&markup.tag_name) {
                return Err(RegistryError::DuplicateTag(markup.tag_name.clone()));
            }
            self.markup_tags.insert(markup.tag_name.clone(), schema.name.clone());
        }
        self.functions.insert(
            schema.name.clone(),
            RegisteredFunction {
                name: schema.name,
                definition: schema.definition,
                markup: schema.markup,
                tool,
            },
        );
        Ok(())
    }

    /// Look up a function by canonical name.
    pub fn get(&self, function_name: &str) -> Option<&RegisteredFunction> {
        self.functions.get(function_name)
    }

    /// Look up a function by its markup tag.
    pub fn get_markup(&self, tag: &str) -> Option<&RegisteredFunction> {
        self.markup_tags
            .get(tag)
            .and_then(|name| self.functions.get(name))
    }

    /// All known markup tags.
    pub fn markup_tags(&self) -> Vec<String> {
        self.markup_tags.keys().cloned().collect()
    }

    /// All function definitions (for sending to the LM).
    pub fn function_definitions(&self) -> Vec<Value> {
        self.functions.values().map(|f| f.definition.clone()).collect()
    }

    /// All registered function names.
    pub fn function_names(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Function '{0}' is already registered")]
    DuplicateName(String),
    #[error("Markup tag '{0}' is already registered")]
    DuplicateTag(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::EchoTool;
    use crate::tools::MessageTool;

    #[test]
    fn register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert!(registry.get_markup("echo").is_some());
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        assert!(matches!(
            registry.register(EchoTool),
            Err(RegistryError::DuplicateName(_))
        ));
    }

    #[test]
    fn multi_method_tool_registers_all_schemas() {
        let mut registry = ToolRegistry::new();
        registry.register(MessageTool).unwrap();

        assert!(registry.get("message_notify_user").is_some());
        assert!(registry.get("message_ask_user").is_some());
        assert!(registry.get("idle").is_some());
        assert_eq!(
            registry.get_markup("message-notify-user").unwrap().name,
            "message_notify_user"
        );

        let mut tags = registry.markup_tags();
        tags.sort();
        assert_eq!(tags, vec!["idle", "message-ask-user", "message-notify-user"]);
    }

    #[tokio::test]
    async fn invoke_through_registry() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();

        let result = registry
            .get("echo")
            .unwrap()
            .invoke(serde_json::json!({"message": "hello"}))
            .await
            .unwrap();
        assert_eq!(result.output_text(), "hello");
    }
}
