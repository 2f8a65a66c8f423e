//! The channel contract and the shared inbound path.
//!
//! Every adapter implements [`Channel`]; the protocol-specific wire handling
//! stays in the adapter, while access control and inbound publication go
//! through [`ChannelCore`] so every transport enforces the same rules.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use rustle_core::bus::queue::MessageBus;
use rustle_core::bus::types::{InboundMessage, OutboundMessage};
use rustle_core::types::MediaAttachment;

/// Per-attachment download cap (bytes). Oversized files are skipped with a
/// hint left in the message text.
pub const MAX_ATTACHMENT_BYTES: u64 = 10 * 1024 * 1024;

/// Fixed delay before an adapter retries its transport.
pub const RECONNECT_DELAY_SECS: u64 = 5;

// ─────────────────────────────────────────────
// Channel trait
// ─────────────────────────────────────────────

/// One external transport.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Name matching the config key and `OutboundMessage.channel`.
    fn name(&self) -> &str;

    /// Long-running listener. Publishes inbound messages until `stop()`.
    /// Transport errors are handled inside (reconnect with back-off); this
    /// only returns on shutdown or a permanently fatal condition.
    async fn start(&self) -> anyhow::Result<()>;

    /// Request shutdown; `start()` must notice promptly.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Deliver one outbound message.
    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()>;
}

// ─────────────────────────────────────────────
// ChannelCore
// ─────────────────────────────────────────────

/// The piece every adapter embeds: channel identity, bus handle, allow-list.
pub struct ChannelCore {
    name: String,
    bus: Arc<MessageBus>,
    allow_from: Vec<String>,
}

impl ChannelCore {
    pub fn new(name: impl Into<String>, bus: Arc<MessageBus>, allow_from: Vec<String>) -> Self {
        Self {
            name: name.into(),
            bus,
            allow_from,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Empty allow-list admits everyone. Composite ids joined by `|` match
    /// when any component matches (e.g. `"user|group"`).
    pub fn is_allowed(&self, sender_id: &str) -> bool {
        if self.allow_from.is_empty() {
            return true;
        }
        if self.allow_from.iter().any(|a| a == sender_id) {
            return true;
        }
        sender_id
            .split('|')
            .filter(|part| !part.is_empty())
            .any(|part| self.allow_from.iter().any(|a| a == part))
    }

    /// Access-check then publish. Denied senders are logged at warn level
    /// and nothing reaches the bus — no reply is ever produced for them.
    pub async fn publish(
        &self,
        sender_id: &str,
        chat_id: &str,
        content: &str,
        media: Vec<MediaAttachment>,
        metadata: HashMap<String, String>,
    ) -> anyhow::Result<bool> {
        if !self.is_allowed(sender_id) {
            warn!(
                channel = %self.name,
                sender = sender_id,
                "access denied; add the sender to allowFrom to grant access"
            );
            return Ok(false);
        }

        let mut msg = InboundMessage::new(&self.name, sender_id, chat_id, content);
        msg.media = media;
        msg.metadata = metadata;
        self.bus
            .publish_inbound(msg)
            .await
            .map_err(|e| anyhow::anyhow!("inbound queue closed: {e}"))?;
        Ok(true)
    }

    /// Directory where adapters store downloaded attachments.
    pub fn media_dir(&self) -> PathBuf {
        rustle_core::utils::media_dir()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
