//! The `spawn` tool — delegate work to a background sub-agent.
//!
//! Returns a confirmation immediately; the sub-agent reports back through
//! the bus when it finishes. The agent loop sets the context per turn so the
//! result routes to the conversation that asked (safe because turns are
//! serialized).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::base::{optional_string, require_string, Tool};
use crate::subagent::SubagentManager;

pub struct SpawnTool {
    manager: Arc<SubagentManager>,
    context: Mutex<(String, String)>,
}

impl SpawnTool {
    pub fn new(manager: Arc<SubagentManager>) -> Self {
        Self {
            manager,
            context: Mutex::new(("cli".into(), "direct".into())),
        }
    }

    pub async fn set_context(&self, channel: &str, chat_id: &str) {
        let mut ctx = self.context.lock().await;
        *ctx = (channel.to_string(), chat_id.to_string());
    }
}

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        "spawn"
    }

    fn description(&self) -> &str {
        "Spawn a background subagent for a complex or long-running task. It \
         works independently and reports back when done."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {"type": "string", "description": "Task for the subagent"},
                "label": {"type": "string", "description": "Short display label"}
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let task = require_string(&params, "task")?;
        let label = optional_string(&params, "label");

        let (origin_channel, origin_chat_id) = {
            let ctx = self.context.lock().await;
            ctx.clone()
        };

        Ok(self
            .manager
            .spawn(task, label, origin_channel, origin_chat_id)
            .await)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rustle_core::bus::queue::MessageBus;
    use rustle_core::types::{LlmResponse, Message, ToolDefinition};
    use rustle_providers::traits::{LlmProvider, LlmRequestConfig};

    struct OneLineProvider;

    #[async_trait]
    impl LlmProvider for OneLineProvider {
        async fn chat(
            &self,
            _messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
            _model: &str,
            _config: &LlmRequestConfig,
        ) -> LlmResponse {
            LlmResponse {
                content: Some("finished".into()),
                ..Default::default()
            }
        }
        fn default_model(&self) -> &str {
            "one-line"
        }
        fn display_name(&self) -> &str {
            "OneLine"
        }
    }

    fn make_tool() -> (SpawnTool, tempfile::TempDir, Arc<crate::tools::ToolRegistry>) {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(MessageBus::new(8));
        let mgr = Arc::new(SubagentManager::new(
            Arc::new(OneLineProvider),
            dir.path().to_path_buf(),
            bus,
            "one-line".into(),
            LlmRequestConfig::default(),
            "Rustle",
        ));
        let registry = Arc::new(crate::tools::ToolRegistry::new());
        mgr.set_registry(Arc::downgrade(&registry));
        (SpawnTool::new(mgr), dir, registry)
    }

    #[test]
    fn schema_marks_task_required() {
        let (tool, _dir, _registry) = make_tool();
        let params = tool.parameters();
        assert_eq!(params["type"], "object");
        let required = params["required"].as_array().unwrap();
        assert!(required.contains(&json!("task")));
        assert!(!required.contains(&json!("label")));
    }

    #[tokio::test]
    async fn execute_returns_confirmation() {
        let (tool, _dir, _registry) = make_tool();
        tool.set_context("telegram", "c1").await;

        let mut params = HashMap::new();
        params.insert("task".to_string(), json!("inventory the fridge"));
        params.insert("label".to_string(), json!("fridge"));
        let out = tool.execute(params).await.unwrap();
        assert!(out.contains("Subagent [fridge] started"));
        assert!(out.contains("notify you"));
    }

    #[tokio::test]
    async fn execute_without_task_errors() {
        let (tool, _dir, _registry) = make_tool();
        assert!(tool.execute(HashMap::new()).await.is_err());
    }
}
