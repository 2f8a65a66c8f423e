//! Sub-agent manager — background task delegation.
//!
//! `spawn` detaches a tokio task running its own bounded LLM ↔ tool loop and
//! returns immediately. The sub-agent's prompt is seeded from the parent's
//! system prompt plus a task block, and it uses the parent's tool registry,
//! held through a `Weak` installed after the registry is built (the registry
//! owns the spawn tool, which owns this manager — a strong reference here
//! would be a cycle).
//!
//! Completion is announced by publishing an `InboundMessage` with
//! `channel = "system"` and `chat_id = "{origin_channel}:{origin_chat_id}"`.
//! Looping through the bus instead of calling back keeps sub-agent results
//! on the same serialization path as user input — replacing it with a direct
//! callback would reintroduce re-entrancy.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use anyhow::Result;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use rustle_core::bus::queue::MessageBus;
use rustle_core::bus::types::InboundMessage;
use rustle_core::types::Message;
use rustle_providers::traits::{LlmProvider, LlmRequestConfig};

use crate::context::ContextBuilder;
use crate::tools::registry::ToolRegistry;

/// Iteration cap for background tasks.
const SUBAGENT_MAX_ITERATIONS: usize = 15;

// ─────────────────────────────────────────────
// TaskInfo
// ─────────────────────────────────────────────

/// A running background task.
#[derive(Clone, Debug)]
pub struct TaskInfo {
    /// 8-hex-char id.
    pub id: String,
    /// Short display label.
    pub label: String,
    /// Full task text.
    pub task: String,
    pub origin_channel: String,
    pub origin_chat_id: String,
}

// ─────────────────────────────────────────────
// SubagentManager
// ─────────────────────────────────────────────

pub struct SubagentManager {
    provider: Arc<dyn LlmProvider>,
    bus: Arc<MessageBus>,
    model: String,
    request_config: LlmRequestConfig,
    context: ContextBuilder,
    /// Parent registry; set once, after registry construction.
    registry: OnceLock<Weak<ToolRegistry>>,
    running: RwLock<HashMap<String, TaskInfo>>,
}

impl SubagentManager {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        workspace: std::path::PathBuf,
        bus: Arc<MessageBus>,
        model: String,
        request_config: LlmRequestConfig,
        agent_name: &str,
    ) -> Self {
        Self {
            provider,
            bus,
            model,
            request_config,
            context: ContextBuilder::new(workspace, agent_name),
            registry: OnceLock::new(),
            running: RwLock::new(HashMap::new()),
        }
    }

    /// Install the shared tool registry. Called exactly once by the agent
    /// loop after it finishes building its registry.
    pub fn set_registry(&self, registry: Weak<ToolRegistry>) {
        let _ = self.registry.set(registry);
    }

    /// Start a background task; returns the confirmation shown to the LLM.
    pub async fn spawn(
        self: &Arc<Self>,
        task: String,
        label: Option<String>,
        origin_channel: String,
        origin_chat_id: String,
    ) -> String {
        let task_id = generate_task_id();
        let display_label = label.unwrap_or_else(|| rustle_core::utils::truncate(&task, 30));

        {
            let mut running = self.running.write().await;
            running.insert(
                task_id.clone(),
                TaskInfo {
                    id: task_id.clone(),
                    label: display_label.clone(),
                    task: task.clone(),
                    origin_channel: origin_channel.clone(),
                    origin_chat_id: origin_chat_id.clone(),
                },
            );
        }

        let mgr = Arc::clone(self);
        let tid = task_id.clone();
        let lbl = display_label.clone();
        tokio::spawn(async move {
            let outcome = mgr.run_subagent(&tid, &task).await;
            let report = match outcome {
                Ok(text) => text,
                Err(e) => {
                    error!(task_id = %tid, error = %e, "sub-agent task failed");
                    format!("Task failed: {e}")
                }
            };
            mgr.announce_result(&tid, &lbl, &report, &origin_channel, &origin_chat_id)
                .await;

            let mut running = mgr.running.write().await;
            running.remove(&tid);
            info!(task_id = %tid, "sub-agent task finished");
        });

        format!("Subagent [{display_label}] started (id: {task_id}). I'll notify you when it completes.")
    }

    /// The sub-agent's own turn-taking loop. Ephemeral: nothing is persisted.
    async fn run_subagent(&self, task_id: &str, task: &str) -> Result<String> {
        info!(task_id = %task_id, "sub-agent starting");

        let registry = self
            .registry
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| anyhow::anyhow!("tool registry is gone"))?;

        let system_prompt = format!(
            "{}\n\n---\n\n{}",
            self.context.build_system_prompt(),
            task_preamble(task)
        );
        let mut messages = vec![Message::system(system_prompt), Message::user(task)];
        let tool_defs = registry.get_definitions();
        let mut final_content: Option<String> = None;

        for iteration in 0..SUBAGENT_MAX_ITERATIONS {
            debug!(task_id = %task_id, iteration, "sub-agent LLM call");

            let response = self
                .provider
                .chat(&messages, Some(&tool_defs), &self.model, &self.request_config)
                .await;

            if response.has_tool_calls() {
                let tool_calls = response.tool_calls.clone();
                messages.push(Message::assistant_turn(
                    response.content.clone(),
                    tool_calls.clone(),
                    response.reasoning_content.clone(),
                ));

                for tc in &tool_calls {
                    let params: HashMap<String, serde_json::Value> =
                        serde_json::from_str(&tc.function.arguments).unwrap_or_default();
                    info!(task_id = %task_id, tool = %tc.function.name, "sub-agent tool call");
                    let result = registry.execute(&tc.function.name, params).await;
                    messages.push(Message::tool_result(&tc.id, &tc.function.name, result));
                }
            } else {
                final_content = response.content;
                break;
            }
        }

        let result = final_content
            .unwrap_or_else(|| "Background task finished without a final report.".into());
        info!(task_id = %task_id, result_len = result.len(), "sub-agent done");
        Ok(result)
    }

    /// Publish the result back through the bus as a system inbound.
    async fn announce_result(
        &self,
        task_id: &str,
        label: &str,
        result: &str,
        origin_channel: &str,
        origin_chat_id: &str,
    ) {
        let content = format!(
            "## Subagent Result\n**Task**: {label}\n\n{result}\n\n---\n\
             *Summarize this naturally for the user. Keep it brief. \
             Do not mention 'subagent' or task ids.*"
        );

        let msg = InboundMessage::new(
            "system",
            "subagent",
            format!("{origin_channel}:{origin_chat_id}"),
            content,
        );

        info!(task_id = %task_id, "announcing sub-agent result");
        if let Err(e) = self.bus.publish_inbound(msg).await {
            error!(task_id = %task_id, error = %e, "failed to announce sub-agent result");
        }
    }

    pub async fn running_tasks(&self) -> Vec<TaskInfo> {
        self.running.read().await.values().cloned().collect()
    }

    pub async fn task_count(&self) -> usize {
        self.running.read().await.len()
    }
}

fn task_preamble(task: &str) -> String {
    format!(
        "# Background Task\n\
         You are running as a detached background agent.\n\n\
         ## Your Task\n{task}\n\n\
         ## Rules\n\
         1. Stay focused on the assigned task only\n\
         2. Your final message is reported back to the main agent\n\
         3. Do not start conversations or side tasks\n\
         4. Be concise but complete"
    )
}

/// 8 hex chars mixed from the clock and a process-wide counter.
fn generate_task_id() -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mixed = nanos
        .wrapping_mul(6364136223846793005)
        .wrapping_add(count as u64);
    format!("{:08x}", (mixed >> 32) as u32)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rustle_core::types::{LlmResponse, ToolCall, ToolDefinition};

    struct ScriptedProvider {
        responses: std::sync::Mutex<Vec<LlmResponse>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<LlmResponse>) -> Self {
            Self {
                responses: std::sync::Mutex::new(responses),
            }
        }

        fn simple(text: &str) -> Self {
            Self::new(vec![LlmResponse {
                content: Some(text.into()),
                ..Default::default()
            }])
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn chat(
            &self,
            _messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
            _model: &str,
            _config: &LlmRequestConfig,
        ) -> LlmResponse {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                LlmResponse {
                    content: Some("(script exhausted)".into()),
                    ..Default::default()
                }
            } else {
                responses.remove(0)
            }
        }

        fn default_model(&self) -> &str {
            "scripted"
        }

        fn display_name(&self) -> &str {
            "Scripted"
        }
    }

    fn make_manager(
        provider: Arc<dyn LlmProvider>,
        workspace: &std::path::Path,
    ) -> (Arc<SubagentManager>, Arc<MessageBus>, Arc<ToolRegistry>) {
        let bus = Arc::new(MessageBus::new(16));
        let mgr = Arc::new(SubagentManager::new(
            provider,
            workspace.to_path_buf(),
            bus.clone(),
            "scripted".into(),
            LlmRequestConfig::default(),
            "Rustle",
        ));

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(crate::tools::filesystem::ReadFileTool::new(None)));
        let registry = Arc::new(registry);
        mgr.set_registry(Arc::downgrade(&registry));
        (mgr, bus, registry)
    }

    #[test]
    fn task_ids_are_short_unique_hex() {
        let a = generate_task_id();
        let b = generate_task_id();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn run_subagent_returns_final_text() {
        let dir = tempfile::tempdir().unwrap();
        let (mgr, _bus, _registry) =
            make_manager(Arc::new(ScriptedProvider::simple("the answer")), dir.path());
        let result = mgr.run_subagent("t1", "find the answer").await.unwrap();
        assert_eq!(result, "the answer");
    }

    #[tokio::test]
    async fn run_subagent_executes_tools_from_shared_registry() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.txt");
        std::fs::write(&file, "payload").unwrap();

        let call = ToolCall::new(
            "c1",
            "read_file",
            serde_json::json!({"path": file.to_str().unwrap()}).to_string(),
        );
        let provider = ScriptedProvider::new(vec![
            LlmResponse {
                tool_calls: vec![call],
                ..Default::default()
            },
            LlmResponse {
                content: Some("file says: payload".into()),
                ..Default::default()
            },
        ]);

        let (mgr, _bus, _registry) = make_manager(Arc::new(provider), dir.path());
        let result = mgr.run_subagent("t2", "read data.txt").await.unwrap();
        assert_eq!(result, "file says: payload");
    }

    #[tokio::test]
    async fn run_subagent_without_registry_fails() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(MessageBus::new(4));
        let mgr = SubagentManager::new(
            Arc::new(ScriptedProvider::simple("x")),
            dir.path().to_path_buf(),
            bus,
            "scripted".into(),
            LlmRequestConfig::default(),
            "Rustle",
        );
        assert!(mgr.run_subagent("t3", "anything").await.is_err());
    }

    #[tokio::test]
    async fn run_subagent_iteration_cap() {
        let dir = tempfile::tempdir().unwrap();
        let call = ToolCall::new("c", "read_file", r#"{"path": "/tmp/x"}"#);
        let responses: Vec<LlmResponse> = (0..30)
            .map(|_| LlmResponse {
                tool_calls: vec![call.clone()],
                ..Default::default()
            })
            .collect();
        let (mgr, _bus, _registry) =
            make_manager(Arc::new(ScriptedProvider::new(responses)), dir.path());
        let result = mgr.run_subagent("t4", "loop").await.unwrap();
        assert!(result.contains("without a final report"));
    }

    #[tokio::test]
    async fn announce_result_publishes_system_inbound() {
        let dir = tempfile::tempdir().unwrap();
        let (mgr, bus, _registry) =
            make_manager(Arc::new(ScriptedProvider::simple("done")), dir.path());

        mgr.announce_result("t5", "a label", "result body", "telegram", "c99")
            .await;

        let msg = bus.consume_inbound().await.unwrap();
        assert_eq!(msg.channel, "system");
        assert_eq!(msg.sender_id, "subagent");
        assert_eq!(msg.chat_id, "telegram:c99");
        assert!(msg.content.contains("a label"));
        assert!(msg.content.contains("result body"));
    }

    #[tokio::test]
    async fn spawn_returns_confirmation_and_announces() {
        let dir = tempfile::tempdir().unwrap();
        let (mgr, bus, _registry) =
            make_manager(Arc::new(ScriptedProvider::simple("all done")), dir.path());

        let confirmation = mgr
            .spawn("count stars".into(), Some("stars".into()), "bridge".into(), "r1".into())
            .await;
        assert!(confirmation.contains("Subagent [stars] started"));

        // The background task publishes its result to the bus.
        let msg = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            bus.consume_inbound(),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(msg.channel, "system");
        assert_eq!(msg.chat_id, "bridge:r1");
        assert!(msg.content.contains("all done"));

        // And cleans itself up.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(mgr.task_count().await, 0);
    }

    #[tokio::test]
    async fn spawn_label_defaults_to_truncated_task() {
        let dir = tempfile::tempdir().unwrap();
        let (mgr, _bus, _registry) =
            make_manager(Arc::new(ScriptedProvider::simple("ok")), dir.path());
        let confirmation = mgr
            .spawn(
                "a very long task description that runs past thirty characters".into(),
                None,
                "cli".into(),
                "direct".into(),
            )
            .await;
        assert!(confirmation.contains("..."));
    }
}
