//! End-to-end pump scenarios: a real bus, a real agent loop, a scripted
//! provider, and a registered test tool. Messages go in through
//! `publish_inbound` and come back out of the outbound queue, exactly as in
//! the gateway.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use rustle_agent::agent_loop::{AgentLoop, AgentLoopOptions};
use rustle_agent::tools::Tool;
use rustle_core::bus::queue::MessageBus;
use rustle_core::bus::types::{InboundMessage, OutboundMessage};
use rustle_core::session::SessionStore;
use rustle_core::types::{LlmResponse, Message, ToolCall, ToolDefinition};
use rustle_providers::traits::{LlmProvider, LlmRequestConfig};

// ─────────────────────────────────────────────
// Test doubles
// ─────────────────────────────────────────────

/// Provider that replays a fixed script and records every request.
struct ScriptedProvider {
    responses: Mutex<Vec<LlmResponse>>,
    calls: AtomicUsize,
    seen_messages: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<LlmResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
            calls: AtomicUsize::new(0),
            seen_messages: Mutex::new(Vec::new()),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn request(&self, n: usize) -> Vec<Message> {
        self.seen_messages.lock().unwrap()[n].clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(
        &self,
        messages: &[Message],
        _tools: Option<&[ToolDefinition]>,
        _model: &str,
        _config: &LlmRequestConfig,
    ) -> LlmResponse {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_messages.lock().unwrap().push(messages.to_vec());
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

/// An `echo(text) → text` tool for the tool-round-trip scenarios.
struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echo the text back"
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        })
    }
    async fn execute(&self, params: HashMap<String, serde_json::Value>) -> anyhow::Result<String> {
        Ok(params
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }
}

// ─────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────

struct Harness {
    bus: Arc<MessageBus>,
    agent: Arc<AgentLoop>,
    _dir: tempfile::TempDir,
}

fn make_harness(provider: Arc<ScriptedProvider>, max_iterations: usize) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(MessageBus::new(16));
    let sessions = SessionStore::new(Some(dir.path().join("sessions"))).unwrap();
    let agent = Arc::new(
        AgentLoop::new(
            bus.clone(),
            provider,
            dir.path().to_path_buf(),
            Some(sessions),
            None,
            AgentLoopOptions {
                max_iterations: Some(max_iterations),
                extra_tools: vec![Arc::new(EchoTool)],
                ..Default::default()
            },
        )
        .unwrap(),
    );
    Harness {
        bus,
        agent,
        _dir: dir,
    }
}

/// Run the pump in the background and wait for one outbound message.
async fn pump_one(harness: &Harness, inbound: InboundMessage) -> OutboundMessage {
    let agent = harness.agent.clone();
    let runner = tokio::spawn(async move { agent.run().await });

    harness.bus.publish_inbound(inbound).await.unwrap();
    let out = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        harness.bus.consume_outbound(),
    )
    .await
    .expect("no outbound within 5s")
    .expect("outbound queue closed");

    runner.abort();
    out
}

// ─────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────

/// No-tool echo: one inbound produces exactly one outbound carrying the
/// provider's text, and the session records both sides of the turn.
#[tokio::test]
async fn no_tool_reply_flows_end_to_end() {
    let provider = ScriptedProvider::new(vec![LlmResponse {
        content: Some("hi".into()),
        ..Default::default()
    }]);
    let harness = make_harness(provider.clone(), 20);

    let out = pump_one(&harness, InboundMessage::new("x", "u", "c", "hello")).await;

    assert_eq!(out.channel, "x");
    assert_eq!(out.chat_id, "c");
    assert_eq!(out.content, "hi");
    assert_eq!(provider.call_count(), 1);

    // Exactly one outbound.
    let extra = tokio::time::timeout(
        std::time::Duration::from_millis(100),
        harness.bus.consume_outbound(),
    )
    .await;
    assert!(extra.is_err());

    let session = harness.agent.sessions().get_or_create("x:c");
    assert_eq!(session.records.len(), 2);
    assert_eq!(session.records[0].content, "hello");
    assert_eq!(session.records[1].content, "hi");
}

/// One tool round-trip: two provider calls; the second request contains the
/// assistant's tool_calls turn followed by a tool result with a matching id.
#[tokio::test]
async fn single_tool_round_trip() {
    let call = ToolCall::new("call_echo_1", "echo", json!({"text": "ping"}).to_string());
    let provider = ScriptedProvider::new(vec![
        LlmResponse {
            tool_calls: vec![call],
            ..Default::default()
        },
        LlmResponse {
            content: Some("done".into()),
            ..Default::default()
        },
    ]);
    let harness = make_harness(provider.clone(), 20);

    let out = pump_one(&harness, InboundMessage::new("x", "u", "c", "echo ping")).await;
    assert_eq!(out.content, "done");
    assert_eq!(provider.call_count(), 2);

    let second_request = provider.request(1);
    let assistant_idx = second_request
        .iter()
        .position(|m| {
            matches!(
                m,
                Message::Assistant {
                    tool_calls: Some(calls),
                    ..
                } if calls.iter().any(|c| c.id == "call_echo_1")
            )
        })
        .expect("assistant turn with tool_calls missing from second request");

    match &second_request[assistant_idx + 1] {
        Message::Tool {
            tool_call_id,
            name,
            content,
        } => {
            assert_eq!(tool_call_id, "call_echo_1");
            assert_eq!(name, "echo");
            assert_eq!(content, "ping");
        }
        other => panic!("expected tool result after assistant turn, got {other:?}"),
    }
}

/// Parameter rejection: an invalid call produces a tool-result error string
/// naming the missing parameter, and the conversation still completes.
#[tokio::test]
async fn invalid_parameters_are_fed_back() {
    let call = ToolCall::new("call_bad", "echo", "{}".to_string());
    let provider = ScriptedProvider::new(vec![
        LlmResponse {
            tool_calls: vec![call],
            ..Default::default()
        },
        LlmResponse {
            content: Some("ok".into()),
            ..Default::default()
        },
    ]);
    let harness = make_harness(provider.clone(), 20);

    let out = pump_one(&harness, InboundMessage::new("x", "u", "c", "misuse echo")).await;
    assert_eq!(out.content, "ok");

    let second_request = provider.request(1);
    let tool_result = second_request
        .iter()
        .find_map(|m| match m {
            Message::Tool { content, .. } => Some(content.clone()),
            _ => None,
        })
        .expect("tool result missing");
    assert!(
        tool_result.starts_with("Error: Invalid parameters"),
        "unexpected tool result: {tool_result}"
    );
    assert!(tool_result.contains("text"));
}

/// Iteration bound: a provider that never stops calling tools is cut off at
/// exactly `max_iterations` calls and the user gets the fixed reply.
#[tokio::test]
async fn iteration_budget_is_enforced() {
    let call = ToolCall::new("call_loop", "echo", json!({"text": "again"}).to_string());
    let responses: Vec<LlmResponse> = (0..10)
        .map(|_| LlmResponse {
            tool_calls: vec![call.clone()],
            ..Default::default()
        })
        .collect();
    let provider = ScriptedProvider::new(responses);
    let harness = make_harness(provider.clone(), 3);

    let out = pump_one(&harness, InboundMessage::new("x", "u", "c", "never stop")).await;
    assert_eq!(provider.call_count(), 3);
    assert_eq!(out.content, AgentLoop::exhausted_reply());
}

/// A poisoned message (malformed system envelope) produces an apology and
/// the pump keeps serving the next message.
#[tokio::test]
async fn pump_survives_a_poisoned_message() {
    let provider = ScriptedProvider::new(vec![LlmResponse {
        content: Some("still alive".into()),
        ..Default::default()
    }]);
    let harness = make_harness(provider.clone(), 20);

    let agent = harness.agent.clone();
    let runner = tokio::spawn(async move { agent.run().await });

    // Malformed: system messages must carry "channel:chat_id" in chat_id.
    harness
        .bus
        .publish_inbound(InboundMessage::new("system", "subagent", "malformed", "x"))
        .await
        .unwrap();
    let apology = harness.bus.consume_outbound().await.unwrap();
    assert!(apology.content.contains("Sorry"));

    // The next ordinary message still gets served.
    harness
        .bus
        .publish_inbound(InboundMessage::new("x", "u", "c", "hello again"))
        .await
        .unwrap();
    let out = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        harness.bus.consume_outbound(),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(out.content, "still alive");

    runner.abort();
}
