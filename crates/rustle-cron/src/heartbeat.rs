//! Heartbeat — periodic self-trigger.
//!
//! Every tick (default 30 minutes) the service looks at `HEARTBEAT.md` in
//! the workspace. If the file has any actionable line, it injects a
//! synthetic CLI-channel inbound asking the agent to work through it.
//! A file of headings, comments, and empty checkboxes costs nothing.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, info};

use rustle_core::bus::queue::MessageBus;
use rustle_core::bus::types::InboundMessage;

/// Default tick interval: 30 minutes.
pub const DEFAULT_HEARTBEAT_INTERVAL_S: u64 = 30 * 60;

/// Prompt injected on an actionable tick.
pub const HEARTBEAT_PROMPT: &str = "Read HEARTBEAT.md in your workspace (if it exists). \
Follow any instructions or tasks listed there. \
If nothing needs attention, reply with just: HEARTBEAT_OK";

/// Channel/chat the synthetic inbound is filed under.
const HEARTBEAT_CHANNEL: &str = "cli";
const HEARTBEAT_CHAT_ID: &str = "heartbeat";

// ─────────────────────────────────────────────
// HeartbeatService
// ─────────────────────────────────────────────

pub struct HeartbeatService {
    workspace: PathBuf,
    bus: Arc<MessageBus>,
    interval_s: u64,
    enabled: bool,
    shutdown: Notify,
}

impl HeartbeatService {
    pub fn new(
        workspace: PathBuf,
        bus: Arc<MessageBus>,
        interval_s: Option<u64>,
        enabled: bool,
    ) -> Self {
        Self {
            workspace,
            bus,
            interval_s: interval_s.unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_S),
            enabled,
            shutdown: Notify::new(),
        }
    }

    fn heartbeat_file(&self) -> PathBuf {
        self.workspace.join("HEARTBEAT.md")
    }

    /// A line counts as actionable unless it is blank, a heading, an HTML
    /// comment, or an unchecked/checked empty checkbox.
    fn has_actionable_content(content: Option<&str>) -> bool {
        let Some(content) = content else { return false };
        content.lines().any(|line| {
            let t = line.trim();
            !(t.is_empty()
                || t.starts_with('#')
                || t.starts_with("<!--")
                || t == "- [ ]"
                || t == "* [ ]"
                || t == "- [x]"
                || t == "* [x]")
        })
    }

    /// Run until `stop()`. Disabled instances just park.
    pub async fn start(&self) -> anyhow::Result<()> {
        if !self.enabled {
            info!("heartbeat disabled");
            self.shutdown.notified().await;
            return Ok(());
        }

        info!(interval_s = self.interval_s, "heartbeat service started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(self.interval_s)) => {
                    self.tick().await;
                }
                _ = self.shutdown.notified() => {
                    info!("heartbeat service shutting down");
                    return Ok(());
                }
            }
        }
    }

    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }

    /// One tick: inspect the file, inject the prompt if there is work.
    pub async fn tick(&self) {
        let content = std::fs::read_to_string(self.heartbeat_file()).ok();
        if !Self::has_actionable_content(content.as_deref()) {
            debug!("heartbeat: nothing to do");
            return;
        }

        info!("heartbeat: injecting check prompt");
        let msg = InboundMessage::new(
            HEARTBEAT_CHANNEL,
            "heartbeat",
            HEARTBEAT_CHAT_ID,
            HEARTBEAT_PROMPT,
        );
        if let Err(e) = self.bus.publish_inbound(msg).await {
            tracing::error!(error = %e, "failed to inject heartbeat message");
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
