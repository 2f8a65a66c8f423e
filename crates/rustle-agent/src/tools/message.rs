//! The `message` tool — lets the agent push a message to a channel instead
//! of (or in addition to) replying inline.
//!
//! The agent loop calls `set_context` before each turn so the tool knows
//! which conversation triggered it. That is safe only because turns are
//! strictly serialized by the single-consumer agent loop; the context is
//! read and written within one turn, never across two.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

use rustle_core::bus::types::OutboundMessage;

use super::base::{optional_string, require_string, Tool};

/// Callback that actually delivers the message (wired to
/// `MessageBus::publish_outbound` in the agent loop).
pub type SendCallback = Arc<
    dyn Fn(OutboundMessage) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send
        + Sync,
>;

pub struct MessageTool {
    send_callback: Option<SendCallback>,
    /// (channel, chat_id) of the conversation currently being served.
    context: Mutex<(String, String)>,
}

impl MessageTool {
    pub fn new(send_callback: Option<SendCallback>) -> Self {
        Self {
            send_callback,
            context: Mutex::new(("cli".into(), "direct".into())),
        }
    }

    /// Called by the agent loop at the start of every turn.
    pub async fn set_context(&self, channel: &str, chat_id: &str) {
        let mut ctx = self.context.lock().await;
        *ctx = (channel.to_string(), chat_id.to_string());
    }
}

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &str {
        "message"
    }

    fn description(&self) -> &str {
        "Send a message to a chat channel. Defaults to the current \
         conversation; pass channel and chat_id to target another one. For a \
         normal reply, just answer in text instead of calling this."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {"type": "string", "description": "Message text"},
                "channel": {
                    "type": "string",
                    "description": "Target channel (defaults to the current one)"
                },
                "chat_id": {
                    "type": "string",
                    "description": "Target chat id (defaults to the current one)"
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let content = require_string(&params, "content")?;
        let channel_override = optional_string(&params, "channel");
        let chat_override = optional_string(&params, "chat_id");

        let (channel, chat_id) = {
            let ctx = self.context.lock().await;
            (
                channel_override.unwrap_or_else(|| ctx.0.clone()),
                chat_override.unwrap_or_else(|| ctx.1.clone()),
            )
        };

        debug!(channel = %channel, chat_id = %chat_id, "message tool sending");

        let msg = OutboundMessage::new(&channel, &chat_id, &content);
        if let Some(cb) = &self.send_callback {
            cb(msg)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to send message: {e}"))?;
        } else {
            debug!("no send callback wired, message discarded");
        }

        Ok(format!("Message sent to {channel}:{chat_id}"))
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn context_defaults_to_cli_direct() {
        let tool = MessageTool::new(None);
        let ctx = tool.context.lock().await;
        assert_eq!(*ctx, ("cli".to_string(), "direct".to_string()));
    }

    #[tokio::test]
    async fn set_context_replaces_target() {
        let tool = MessageTool::new(None);
        tool.set_context("telegram", "c42").await;
        let mut params = HashMap::new();
        params.insert("content".to_string(), json!("hello"));
        let out = tool.execute(params).await.unwrap();
        assert_eq!(out, "Message sent to telegram:c42");
    }

    #[tokio::test]
    async fn explicit_target_overrides_context() {
        let tool = MessageTool::new(None);
        tool.set_context("telegram", "c42").await;
        let mut params = HashMap::new();
        params.insert("content".to_string(), json!("hi"));
        params.insert("channel".to_string(), json!("bridge"));
        params.insert("chat_id".to_string(), json!("room-1"));
        let out = tool.execute(params).await.unwrap();
        assert_eq!(out, "Message sent to bridge:room-1");
    }

    #[tokio::test]
    async fn missing_content_errors() {
        let tool = MessageTool::new(None);
        assert!(tool.execute(HashMap::new()).await.is_err());
    }

    #[tokio::test]
    async fn callback_receives_the_message() {
        let received: Arc<Mutex<Vec<OutboundMessage>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let cb: SendCallback = Arc::new(move |msg| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().await.push(msg);
                Ok(())
            })
        });

        let tool = MessageTool::new(Some(cb));
        tool.set_context("bridge", "room-2").await;
        let mut params = HashMap::new();
        params.insert("content".to_string(), json!("dispatch me"));
        tool.execute(params).await.unwrap();

        let sent = received.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel, "bridge");
        assert_eq!(sent[0].chat_id, "room-2");
        assert_eq!(sent[0].content, "dispatch me");
    }
}
