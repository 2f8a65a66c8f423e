//! The agent loop — one long-lived pump from inbound messages to replies.
//!
//! The loop is the sole consumer of the bus's inbound queue, which makes
//! turns strictly serialized: that invariant is what allows the per-turn
//! `set_context` calls on the message/spawn/cron tools to be lock-free from
//! the tools' point of view.
//!
//! Per message: classify (system messages come from sub-agents and carry the
//! origin conversation encoded in `chat_id`), load the session, build the
//! context, then iterate LLM ↔ tools up to `max_iterations`. Errors never
//! kill the pump — the user gets a brief apology and the loop moves on.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use rustle_core::bus::queue::MessageBus;
use rustle_core::bus::types::{InboundMessage, OutboundMessage};
use rustle_core::session::SessionStore;
use rustle_core::types::Message;
use rustle_cron::CronService;
use rustle_providers::traits::{LlmProvider, LlmRequestConfig};

use crate::context::ContextBuilder;
use crate::subagent::SubagentManager;
use crate::tools::cron::CronTool;
use crate::tools::filesystem::{EditFileTool, ListDirTool, ReadFileTool, WriteFileTool};
use crate::tools::message::{MessageTool, SendCallback};
use crate::tools::registry::ToolRegistry;
use crate::tools::shell::ExecTool;
use crate::tools::spawn::SpawnTool;
use crate::tools::web::{WebFetchTool, WebSearchTool};

/// Cap on LLM ↔ tool iterations per message.
const DEFAULT_MAX_ITERATIONS: usize = 20;

/// History tail shown to the LLM.
const HISTORY_LIMIT: usize = 50;

/// Fixed reply when the iteration budget runs out.
const EXHAUSTED_REPLY: &str =
    "I couldn't finish this within my tool-call budget. Please try again, or break the request into smaller steps.";

/// Reply when the model stops without any text.
const EMPTY_REPLY: &str = "I've finished processing but have nothing to report.";

/// Reply when processing blows up outside the turn loop.
const ERROR_REPLY: &str = "Sorry, something went wrong while processing your message.";

// ─────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────

/// Tunables for [`AgentLoop::new`]; `Default` works for tests and the CLI.
#[derive(Default)]
pub struct AgentLoopOptions {
    /// Model override; the provider's default otherwise.
    pub model: Option<String>,
    pub max_iterations: Option<usize>,
    pub request_config: Option<LlmRequestConfig>,
    /// Brave Search key for the web_search tool.
    pub brave_api_key: Option<String>,
    pub exec_timeout_secs: Option<u64>,
    pub restrict_to_workspace: bool,
    pub agent_name: Option<String>,
    /// Additional tools registered alongside the built-ins.
    pub extra_tools: Vec<Arc<dyn crate::tools::Tool>>,
}

// ─────────────────────────────────────────────
// AgentLoop
// ─────────────────────────────────────────────

pub struct AgentLoop {
    bus: Arc<MessageBus>,
    provider: Arc<dyn LlmProvider>,
    model: String,
    max_iterations: usize,
    request_config: LlmRequestConfig,
    tools: Arc<ToolRegistry>,
    context: ContextBuilder,
    sessions: SessionStore,
    message_tool: Arc<MessageTool>,
    spawn_tool: Arc<SpawnTool>,
    cron_tool: Option<Arc<CronTool>>,
    subagents: Arc<SubagentManager>,
}

impl AgentLoop {
    pub fn new(
        bus: Arc<MessageBus>,
        provider: Arc<dyn LlmProvider>,
        workspace: PathBuf,
        sessions: Option<SessionStore>,
        cron_service: Option<Arc<CronService>>,
        options: AgentLoopOptions,
    ) -> Result<Self> {
        let model = options
            .model
            .unwrap_or_else(|| provider.default_model().to_string());
        let max_iterations = options.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);
        let request_config = options.request_config.unwrap_or_default();
        let agent_name = options.agent_name.unwrap_or_else(|| "Rustle".into());
        let sessions = match sessions {
            Some(s) => s,
            None => SessionStore::new(None)?,
        };

        let context = ContextBuilder::new(&workspace, agent_name.as_str());

        // Outbound side-effects from the message tool go straight to the bus.
        let send_bus = bus.clone();
        let send_callback: SendCallback = Arc::new(move |msg| {
            let bus = send_bus.clone();
            Box::pin(async move {
                bus.publish_outbound(msg)
                    .await
                    .map_err(|e| anyhow::anyhow!("outbound queue closed: {e}"))
            })
        });
        let message_tool = Arc::new(MessageTool::new(Some(send_callback)));

        let subagents = Arc::new(SubagentManager::new(
            provider.clone(),
            workspace.clone(),
            bus.clone(),
            model.clone(),
            request_config.clone(),
            &agent_name,
        ));
        let spawn_tool = Arc::new(SpawnTool::new(subagents.clone()));
        let cron_tool = cron_service.map(|svc| Arc::new(CronTool::new(svc)));

        let mut registry = ToolRegistry::new();
        let allowed_dir = options
            .restrict_to_workspace
            .then(|| workspace.clone());

        registry.register(Arc::new(ReadFileTool::new(allowed_dir.clone())));
        registry.register(Arc::new(WriteFileTool::new(allowed_dir.clone())));
        registry.register(Arc::new(EditFileTool::new(allowed_dir.clone())));
        registry.register(Arc::new(ListDirTool::new(allowed_dir)));
        registry.register(Arc::new(ExecTool::new(
            workspace.clone(),
            options.exec_timeout_secs,
            options.restrict_to_workspace,
        )));
        registry.register(Arc::new(WebSearchTool::new(options.brave_api_key)));
        registry.register(Arc::new(WebFetchTool::new()));
        registry.register(message_tool.clone());
        registry.register(spawn_tool.clone());
        if let Some(cron) = &cron_tool {
            registry.register(cron.clone());
        }
        for tool in options.extra_tools {
            registry.register(tool);
        }

        let tools = Arc::new(registry);
        // Sub-agents share the registry through a weak handle; a strong one
        // would cycle back through the spawn tool.
        subagents.set_registry(Arc::downgrade(&tools));

        info!(
            model = %model,
            tools = tools.len(),
            max_iterations,
            "agent loop ready"
        );

        Ok(Self {
            bus,
            provider,
            model,
            max_iterations,
            request_config,
            tools,
            context,
            sessions,
            message_tool,
            spawn_tool,
            cron_tool,
            subagents,
        })
    }

    /// Pump inbound messages until the queue closes. One bad message never
    /// stops the pump.
    pub async fn run(&self) {
        info!("agent loop started");
        while let Some(msg) = self.bus.consume_inbound().await {
            let session_key = msg.session_key();
            debug!(session_key = %session_key, "inbound message");

            let result = if msg.channel == "system" {
                self.process_system_message(&msg).await
            } else {
                self.process_message(&msg).await
            };

            match result {
                Ok(response) => {
                    if let Err(e) = self.bus.publish_outbound(response).await {
                        error!(error = %e, "failed to publish outbound");
                    }
                }
                Err(e) => {
                    error!(session_key = %session_key, error = %e, "message processing failed");
                    let apology = OutboundMessage::with_metadata(
                        &msg.channel,
                        &msg.chat_id,
                        ERROR_REPLY,
                        msg.metadata.clone(),
                    );
                    let _ = self.bus.publish_outbound(apology).await;
                }
            }
        }
        info!("inbound queue closed, agent loop exiting");
    }

    /// One regular turn: session, context, iterate, persist, reply.
    pub async fn process_message(&self, msg: &InboundMessage) -> Result<OutboundMessage> {
        let session_key = msg.session_key();
        self.point_tools_at(&msg.channel, &msg.chat_id).await;

        let history = self.sessions.get_history(&session_key, HISTORY_LIMIT);
        let messages =
            self.context
                .build_messages(&history, &msg.content, &msg.media, &msg.channel, &msg.chat_id);

        let content = self.run_turn(messages).await;

        self.sessions.append(&session_key, "user", &msg.content);
        self.sessions.append(&session_key, "assistant", &content);

        // Metadata must survive the round trip; threading adapters need it.
        Ok(OutboundMessage::with_metadata(
            &msg.channel,
            &msg.chat_id,
            content,
            msg.metadata.clone(),
        ))
    }

    /// A sub-agent completion: `chat_id` encodes the origin conversation as
    /// `channel:chat_id`; the reply is synthesized in that session and
    /// routed there.
    async fn process_system_message(&self, msg: &InboundMessage) -> Result<OutboundMessage> {
        info!(sender = %msg.sender_id, chat_id = %msg.chat_id, "system message");

        let (origin_channel, origin_chat_id) = msg
            .chat_id
            .split_once(':')
            .map(|(c, i)| (c.to_string(), i.to_string()))
            .ok_or_else(|| {
                anyhow::anyhow!("malformed system chat_id (want channel:chat_id): {}", msg.chat_id)
            })?;

        let session_key = format!("{origin_channel}:{origin_chat_id}");
        self.point_tools_at(&origin_channel, &origin_chat_id).await;

        let history = self.sessions.get_history(&session_key, HISTORY_LIMIT);
        let messages = self.context.build_messages(
            &history,
            &msg.content,
            &[],
            &origin_channel,
            &origin_chat_id,
        );

        let content = self.run_turn(messages).await;

        self.sessions.append(
            &session_key,
            "user",
            &format!("[system:{}] {}", msg.sender_id, msg.content),
        );
        self.sessions.append(&session_key, "assistant", &content);

        Ok(OutboundMessage::with_metadata(
            &origin_channel,
            &origin_chat_id,
            content,
            msg.metadata.clone(),
        ))
    }

    /// The bounded LLM ↔ tool iteration. Returns the final text, or the
    /// fixed exhaustion reply when the budget runs out.
    async fn run_turn(&self, mut messages: Vec<Message>) -> String {
        let tool_defs = self.tools.get_definitions();

        for iteration in 0..self.max_iterations {
            debug!(iteration, "LLM call");
            let response = self
                .provider
                .chat(&messages, Some(&tool_defs), &self.model, &self.request_config)
                .await;

            if !response.has_tool_calls() {
                return response.content.unwrap_or_else(|| EMPTY_REPLY.to_string());
            }

            let tool_calls = response.tool_calls.clone();
            // Reasoning content rides along so thinking models keep their
            // chain of thought across iterations.
            messages.push(Message::assistant_turn(
                response.content.clone(),
                tool_calls.clone(),
                response.reasoning_content.clone(),
            ));

            for tc in &tool_calls {
                let params: HashMap<String, serde_json::Value> =
                    serde_json::from_str(&tc.function.arguments).unwrap_or_default();
                info!(tool = %tc.function.name, iteration, "tool call");
                let result = self.tools.execute(&tc.function.name, params).await;
                debug!(tool = %tc.function.name, result_len = result.len(), "tool result");
                messages.push(Message::tool_result(&tc.id, &tc.function.name, result));
            }
        }

        warn!(max_iterations = self.max_iterations, "iteration budget exhausted");
        EXHAUSTED_REPLY.to_string()
    }

    /// Aim the context-carrying tools at the current conversation. Turns are
    /// serialized by the single-consumer pump, so this cannot race.
    async fn point_tools_at(&self, channel: &str, chat_id: &str) {
        self.message_tool.set_context(channel, chat_id).await;
        self.spawn_tool.set_context(channel, chat_id).await;
        if let Some(cron) = &self.cron_tool {
            cron.set_context(channel, chat_id).await;
        }
    }

    /// One-shot processing on the CLI channel (REPL, cron CLI, tests).
    pub async fn process_direct(&self, text: &str) -> Result<String> {
        let msg = InboundMessage::new("cli", "user", "direct", text);
        Ok(self.process_message(&msg).await?.content)
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn subagents(&self) -> &Arc<SubagentManager> {
        &self.subagents
    }

    /// The fixed exhaustion reply (exported for tests and the CLI).
    pub fn exhausted_reply() -> &'static str {
        EXHAUSTED_REPLY
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
