//! Bus event envelopes.
//!
//! `InboundMessage` flows channel → agent, `OutboundMessage` flows agent →
//! channel. A conversation is identified by `"channel:chat_id"` everywhere.

use crate::types::MediaAttachment;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// A message arriving from a channel (or synthesized by the scheduler).
#[derive(Clone, Debug)]
pub struct InboundMessage {
    /// Adapter name, or "system" for sub-agent completions.
    pub channel: String,
    /// Sender identifier within the channel.
    pub sender_id: String,
    /// Chat/conversation identifier.
    pub chat_id: String,
    /// Text content.
    pub content: String,
    /// Receive time.
    pub timestamp: DateTime<Utc>,
    /// Attached media, in arrival order.
    pub media: Vec<MediaAttachment>,
    /// Opaque adapter-specific metadata. Forwarded bit-for-bit to the
    /// outbound reply so threading-capable adapters keep working.
    pub metadata: HashMap<String, String>,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        InboundMessage {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            media: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Session key: `"channel:chat_id"`. Uniquely identifies a conversation.
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }
}

/// A message leaving the agent for a channel.
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    /// Optional message id to reply to.
    pub reply_to: Option<String>,
    pub media: Vec<MediaAttachment>,
    /// Metadata carried over from the inbound that triggered this reply.
    pub metadata: HashMap<String, String>,
}

impl OutboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        OutboundMessage {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            reply_to: None,
            media: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Same, with metadata attached up front.
    pub fn with_metadata(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
        metadata: HashMap<String, String>,
    ) -> Self {
        OutboundMessage {
            metadata,
            ..OutboundMessage::new(channel, chat_id, content)
        }
    }
}
