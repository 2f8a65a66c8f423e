//! Generic WebSocket bridge adapter.
//!
//! For transports whose protocol lives in an external bridge process (a
//! Node.js WhatsApp bridge, a Matrix shim, ...): Rustle connects to the
//! bridge as a WebSocket client and speaks a small JSON frame protocol.
//!
//! Frames from the bridge:
//! - `{"type":"message","sender":"...","chat":"...","text":"...","metadata":{...}}`
//! - `{"type":"status","status":"connected" | "..."}`
//!
//! Frames to the bridge:
//! - `{"type":"send","to":"...","text":"...","metadata":{...}}`
//!
//! The connection auto-reconnects with a fixed back-off and exits promptly
//! on `stop()`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use rustle_core::bus::queue::MessageBus;
use rustle_core::bus::types::OutboundMessage;

use crate::base::{Channel, ChannelCore, RECONNECT_DELAY_SECS};

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    tokio_tungstenite::tungstenite::Message,
>;

pub struct BridgeChannel {
    url: String,
    core: ChannelCore,
    shutdown: Notify,
    /// Set by `stop()`; distinguishes "we are stopping" from "remote closed"
    /// when a session ends cleanly.
    stop_requested: AtomicBool,
    /// Write half of the live connection, when there is one.
    writer: Mutex<Option<WsSink>>,
    connected: Mutex<bool>,
}

impl BridgeChannel {
    pub fn new(url: String, bus: Arc<MessageBus>, allow_from: Vec<String>) -> Self {
        Self {
            url,
            core: ChannelCore::new("bridge", bus, allow_from),
            shutdown: Notify::new(),
            stop_requested: AtomicBool::new(false),
            writer: Mutex::new(None),
            connected: Mutex::new(false),
        }
    }

    /// One connection lifetime. `Ok` means a clean end (remote close or
    /// shutdown); `Err` triggers the reconnect path.
    async fn session(&self) -> anyhow::Result<()> {
        use tokio_tungstenite::tungstenite::Message as WsMessage;

        debug!(url = %self.url, "connecting to bridge");
        let (stream, _) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        info!("bridge connected");

        let (write, mut read) = stream.split();
        *self.writer.lock().await = Some(write);

        loop {
            tokio::select! {
                frame = read.next() => {
                    let frame = match frame {
                        Some(Ok(f)) => f,
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            debug!("bridge stream ended");
                            return Ok(());
                        }
                    };
                    let text = match frame {
                        WsMessage::Text(t) => t.to_string(),
                        WsMessage::Close(_) => {
                            info!("bridge closed the connection");
                            return Ok(());
                        }
                        _ => continue,
                    };
                    if let Err(e) = self.handle_frame(&text).await {
                        warn!(error = %e, "bad bridge frame");
                    }
                }
                _ = self.shutdown.notified() => {
                    if let Some(mut write) = self.writer.lock().await.take() {
                        let _ = write.send(WsMessage::Close(None)).await;
                    }
                    return Ok(());
                }
            }
        }
    }

    pub(crate) async fn handle_frame(&self, raw: &str) -> anyhow::Result<()> {
        let frame: Value = serde_json::from_str(raw)?;
        match frame["type"].as_str().unwrap_or("") {
            "message" => {
                let sender = frame["sender"].as_str().unwrap_or_default();
                let chat = frame["chat"].as_str().unwrap_or_default();
                let text = frame["text"].as_str().unwrap_or_default();
                if sender.is_empty() || chat.is_empty() {
                    anyhow::bail!("message frame missing sender/chat");
                }

                let metadata: HashMap<String, String> = frame["metadata"]
                    .as_object()
                    .map(|obj| {
                        obj.iter()
                            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                            .collect()
                    })
                    .unwrap_or_default();

                self.core
                    .publish(sender, chat, text, Vec::new(), metadata)
                    .await?;
            }
            "status" => {
                let status = frame["status"].as_str().unwrap_or("unknown");
                let mut connected = self.connected.lock().await;
                let now = status == "connected";
                if now != *connected {
                    if now {
                        info!("bridge reports connected");
                    } else {
                        warn!(status = status, "bridge reports disconnected");
                    }
                }
                *connected = now;
            }
            other => debug!(frame_type = other, "ignoring bridge frame"),
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for BridgeChannel {
    fn name(&self) -> &str {
        self.core.name()
    }

    async fn start(&self) -> anyhow::Result<()> {
        loop {
            match self.session().await {
                Ok(()) => {
                    // Clean end: either shutdown was requested, or the remote
                    // closed and we reconnect like any other failure.
                    *self.writer.lock().await = None;
                    *self.connected.lock().await = false;
                    if self.stop_requested.load(Ordering::SeqCst) {
                        info!("bridge channel stopped");
                        return Ok(());
                    }
                }
                Err(e) => {
                    *self.writer.lock().await = None;
                    *self.connected.lock().await = false;
                    warn!(error = %e, "bridge session error, reconnecting in {RECONNECT_DELAY_SECS}s");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(RECONNECT_DELAY_SECS)) => {}
                _ = self.shutdown.notified() => {
                    info!("bridge channel stopped during reconnect wait");
                    return Ok(());
                }
            }
        }
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()> {
        use tokio_tungstenite::tungstenite::Message as WsMessage;

        let frame = json!({
            "type": "send",
            "to": msg.chat_id,
            "text": msg.content,
            "metadata": msg.metadata,
        });

        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(w) => {
                w.send(WsMessage::Text(frame.to_string().into())).await?;
                debug!(chat = %msg.chat_id, "bridge frame sent");
                Ok(())
            }
            None => anyhow::bail!("bridge not connected"),
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_channel(allow: Vec<String>) -> (BridgeChannel, Arc<MessageBus>) {
        let bus = Arc::new(MessageBus::new(8));
        let channel = BridgeChannel::new("ws://localhost:3001".into(), bus.clone(), allow);
        (channel, bus)
    }

    #[tokio::test]
    async fn message_frame_reaches_the_bus() {
        let (channel, bus) = make_channel(vec![]);
        channel
            .handle_frame(
                r#"{"type":"message","sender":"u1","chat":"room-1","text":"hi","metadata":{"thread":"t9"}}"#,
            )
            .await
            .unwrap();

        let msg = bus.consume_inbound().await.unwrap();
        assert_eq!(msg.channel, "bridge");
        assert_eq!(msg.sender_id, "u1");
        assert_eq!(msg.chat_id, "room-1");
        assert_eq!(msg.content, "hi");
        assert_eq!(msg.metadata.get("thread").unwrap(), "t9");
    }

    #[tokio::test]
    async fn allow_list_filters_frames() {
        let (channel, bus) = make_channel(vec!["alice".into()]);
        channel
            .handle_frame(r#"{"type":"message","sender":"bob","chat":"room","text":"no"}"#)
            .await
            .unwrap();

        let got = tokio::time::timeout(
            std::time::Duration::from_millis(30),
            bus.consume_inbound(),
        )
        .await;
        assert!(got.is_err());
    }

    #[tokio::test]
    async fn incomplete_message_frame_is_an_error() {
        let (channel, _bus) = make_channel(vec![]);
        let err = channel
            .handle_frame(r#"{"type":"message","text":"orphan"}"#)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing sender/chat"));
    }

    #[tokio::test]
    async fn status_frames_update_connected_flag() {
        let (channel, _bus) = make_channel(vec![]);
        channel
            .handle_frame(r#"{"type":"status","status":"connected"}"#)
            .await
            .unwrap();
        assert!(*channel.connected.lock().await);

        channel
            .handle_frame(r#"{"type":"status","status":"reconnecting"}"#)
            .await
            .unwrap();
        assert!(!*channel.connected.lock().await);
    }

    #[tokio::test]
    async fn unknown_frames_are_ignored() {
        let (channel, _bus) = make_channel(vec![]);
        channel
            .handle_frame(r#"{"type":"presence","who":"u1"}"#)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn garbage_frame_is_an_error() {
        let (channel, _bus) = make_channel(vec![]);
        assert!(channel.handle_frame("not json").await.is_err());
    }

    #[tokio::test]
    async fn send_without_connection_fails() {
        let (channel, _bus) = make_channel(vec![]);
        let err = channel
            .send(&OutboundMessage::new("bridge", "room-1", "hello"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not connected"));
    }

    #[tokio::test]
    async fn stop_exits_reconnect_wait_promptly() {
        // No bridge is listening at the URL, so start() lands in the
        // reconnect wait; stop() must break it out.
        let (channel, _bus) = make_channel(vec![]);
        let channel = Arc::new(channel);
        let runner = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.start().await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        channel.stop().await.unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), runner).await;
        assert!(result.is_ok(), "start() did not stop promptly");
    }
}
