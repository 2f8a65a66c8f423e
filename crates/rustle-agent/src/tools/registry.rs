//! Tool registry — lookup, schema export, and guarded dispatch.
//!
//! `execute` never raises: validation failures, unknown tools, and tool
//! errors all come back as strings, which the agent loop feeds to the LLM as
//! the tool result so the model can correct itself.

use std::collections::HashMap;
use std::sync::Arc;

use rustle_core::types::ToolDefinition;
use tracing::{info, warn};

use super::base::Tool;

/// Name → tool map. Names are unique; a re-register replaces.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        info!(tool = tool.name(), "tool registered");
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        let removed = self.tools.remove(name);
        if removed.is_some() {
            info!(tool = name, "tool unregistered");
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Sorted names, for stable display and tests.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Function-calling schemas for every tool, sorted by name.
    pub fn get_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Validate, then run. The LLM always gets a string back.
    pub async fn execute(&self, name: &str, params: HashMap<String, serde_json::Value>) -> String {
        let Some(tool) = self.tools.get(name) else {
            warn!(tool = name, "tool not found");
            return format!("Error: Tool '{name}' not found");
        };

        let violations = tool.validate_params(&params);
        if !violations.is_empty() {
            warn!(tool = name, ?violations, "invalid tool parameters");
            return format!(
                "Error: Invalid parameters for tool '{name}': {}",
                violations.join("; ")
            );
        }

        match tool.execute(params).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = name, error = %e, "tool execution failed");
                format!("Error executing {name}: {e}")
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input back"
        }
        fn parameters(&self) -> serde_json::Value {
            json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string", "description": "Text to echo"}
                },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            params: HashMap<String, serde_json::Value>,
        ) -> anyhow::Result<String> {
            Ok(params
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string())
        }
    }

    struct BrokenTool;

    #[async_trait]
    impl Tool for BrokenTool {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {}, "required": []})
        }
        async fn execute(
            &self,
            _params: HashMap<String, serde_json::Value>,
        ) -> anyhow::Result<String> {
            anyhow::bail!("deliberate failure")
        }
    }

    #[test]
    fn register_lookup_unregister() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        assert!(reg.has("echo"));
        assert!(reg.get("echo").is_some());
        assert_eq!(reg.len(), 1);

        assert!(reg.unregister("echo").is_some());
        assert!(reg.is_empty());
        assert!(reg.unregister("echo").is_none());
    }

    #[test]
    fn names_and_definitions_sorted() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(BrokenTool));
        reg.register(Arc::new(EchoTool));
        assert_eq!(reg.tool_names(), vec!["broken", "echo"]);
        let defs = reg.get_definitions();
        assert_eq!(defs[0].function.name, "broken");
        assert_eq!(defs[1].function.name, "echo");
        assert!(defs.iter().all(|d| d.tool_type == "function"));
    }

    #[tokio::test]
    async fn execute_happy_path() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        let mut params = HashMap::new();
        params.insert("text".to_string(), json!("ping"));
        assert_eq!(reg.execute("echo", params).await, "ping");
    }

    #[tokio::test]
    async fn execute_unknown_tool() {
        let reg = ToolRegistry::new();
        let out = reg.execute("ghost", HashMap::new()).await;
        assert_eq!(out, "Error: Tool 'ghost' not found");
    }

    #[tokio::test]
    async fn execute_rejects_invalid_params() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        let out = reg.execute("echo", HashMap::new()).await;
        assert!(out.starts_with("Error: Invalid parameters for tool 'echo':"));
        assert!(out.contains("text"));
    }

    #[tokio::test]
    async fn execute_rejects_wrong_type() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        let mut params = HashMap::new();
        params.insert("text".to_string(), json!(5));
        let out = reg.execute("echo", params).await;
        assert!(out.starts_with("Error: Invalid parameters"));
        assert!(out.contains("text should be string"));
    }

    #[tokio::test]
    async fn execute_catches_tool_errors() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(BrokenTool));
        let out = reg.execute("broken", HashMap::new()).await;
        assert!(out.starts_with("Error executing broken:"));
        assert!(out.contains("deliberate failure"));
    }
}
