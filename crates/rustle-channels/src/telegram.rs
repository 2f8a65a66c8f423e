//! Telegram adapter — long polling over the Bot API.
//!
//! No webhook and no public IP: a `getUpdates` long poll with a 30-second
//! hold, `sendMessage` for replies (split at the 4096-char limit), and
//! `getFile` + a capped download for photo/document attachments, stored
//! under the shared media directory with a hint left in the message text.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use rustle_core::bus::queue::MessageBus;
use rustle_core::bus::types::OutboundMessage;
use rustle_core::types::MediaAttachment;

use crate::base::{Channel, ChannelCore, MAX_ATTACHMENT_BYTES, RECONNECT_DELAY_SECS};

/// Telegram's hard message-length limit.
const TELEGRAM_MAX_LEN: usize = 4096;

/// Long-poll hold time (seconds).
const POLL_TIMEOUT_SECS: u64 = 30;

pub struct TelegramChannel {
    token: String,
    api_base: String,
    core: ChannelCore,
    client: reqwest::Client,
    shutdown: Notify,
    /// Next update offset for getUpdates.
    offset: AtomicI64,
}

impl TelegramChannel {
    pub fn new(token: String, bus: Arc<MessageBus>, allow_from: Vec<String>) -> Self {
        Self::with_api_base(token, bus, allow_from, "https://api.telegram.org".into())
    }

    /// Custom API base, for tests against a local mock.
    pub fn with_api_base(
        token: String,
        bus: Arc<MessageBus>,
        allow_from: Vec<String>,
        api_base: String,
    ) -> Self {
        let client = reqwest::Client::builder()
            // Poll hold plus headroom; the request itself must outlive it.
            .timeout(std::time::Duration::from_secs(POLL_TIMEOUT_SECS + 15))
            .build()
            .unwrap_or_default();

        Self {
            token,
            api_base,
            core: ChannelCore::new("telegram", bus, allow_from),
            client,
            shutdown: Notify::new(),
            offset: AtomicI64::new(0),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{file_path}", self.api_base, self.token)
    }

    /// One getUpdates round. Returns the updates array.
    async fn poll_updates(&self) -> anyhow::Result<Vec<Value>> {
        let offset = self.offset.load(Ordering::SeqCst);
        let resp = self
            .client
            .get(self.method_url("getUpdates"))
            .query(&[
                ("timeout", POLL_TIMEOUT_SECS.to_string()),
                ("offset", offset.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: Value = resp.json().await?;
        if !body["ok"].as_bool().unwrap_or(false) {
            anyhow::bail!("getUpdates not ok: {body}");
        }
        Ok(body["result"].as_array().cloned().unwrap_or_default())
    }

    async fn handle_update(&self, update: &Value) {
        if let Some(update_id) = update["update_id"].as_i64() {
            // getUpdates returns everything >= offset; advance past this one.
            self.offset.fetch_max(update_id + 1, Ordering::SeqCst);
        }

        let message = &update["message"];
        if message.is_null() {
            return;
        }

        let chat_id = match message["chat"]["id"].as_i64() {
            Some(id) => id.to_string(),
            None => return,
        };
        let sender_id = message["from"]["id"]
            .as_i64()
            .map(|id| id.to_string())
            .unwrap_or_default();
        let username = message["from"]["username"].as_str().unwrap_or_default();

        let mut content_parts: Vec<String> = Vec::new();
        if let Some(text) = message["text"].as_str() {
            content_parts.push(text.to_string());
        }
        if let Some(caption) = message["caption"].as_str() {
            content_parts.push(caption.to_string());
        }

        let mut media: Vec<MediaAttachment> = Vec::new();

        // Largest photo variant only.
        if let Some(photo) = message["photo"].as_array().and_then(|p| p.last()) {
            let size = photo["file_size"].as_u64().unwrap_or(0);
            if let Some(file_id) = photo["file_id"].as_str() {
                match self.download_file(file_id, size).await {
                    Ok(path) => {
                        content_parts.push(format!("[image: {path}]"));
                        media.push(MediaAttachment {
                            mime_type: "image/jpeg".into(),
                            path,
                            filename: None,
                            size: Some(size),
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "photo download failed");
                        content_parts.push("[image: download failed]".into());
                    }
                }
            }
        }

        let document = &message["document"];
        if let Some(file_id) = document["file_id"].as_str() {
            let size = document["file_size"].as_u64().unwrap_or(0);
            let filename = document["file_name"].as_str().unwrap_or("file");
            let mime = document["mime_type"].as_str().unwrap_or("application/octet-stream");
            match self.download_file(file_id, size).await {
                Ok(path) => {
                    content_parts.push(format!("[file {filename}: {path}]"));
                    media.push(MediaAttachment {
                        mime_type: mime.into(),
                        path,
                        filename: Some(filename.into()),
                        size: Some(size),
                    });
                }
                Err(e) => {
                    warn!(error = %e, "document download failed");
                    content_parts.push(format!("[file {filename}: download failed]"));
                }
            }
        }

        let content = content_parts.join("\n");
        if content.is_empty() && media.is_empty() {
            return;
        }

        let mut metadata = HashMap::new();
        if let Some(message_id) = message["message_id"].as_i64() {
            metadata.insert("message_id".to_string(), message_id.to_string());
        }
        if !username.is_empty() {
            metadata.insert("username".to_string(), username.to_string());
        }

        if let Err(e) = self
            .core
            .publish(&sender_id, &chat_id, &content, media, metadata)
            .await
        {
            warn!(error = %e, "failed to publish telegram message");
        }
    }

    /// getFile + download into the media dir. Enforces the size cap both
    /// from the reported size and the actual body length.
    async fn download_file(&self, file_id: &str, reported_size: u64) -> anyhow::Result<String> {
        if reported_size > MAX_ATTACHMENT_BYTES {
            anyhow::bail!("attachment too large ({reported_size} bytes)");
        }

        let resp: Value = self
            .client
            .get(self.method_url("getFile"))
            .query(&[("file_id", file_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let file_path = resp["result"]["file_path"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("getFile returned no file_path"))?;

        let bytes = self
            .client
            .get(self.file_url(file_path))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        if bytes.len() as u64 > MAX_ATTACHMENT_BYTES {
            anyhow::bail!("attachment body exceeds cap ({} bytes)", bytes.len());
        }

        let media_dir = self.core.media_dir();
        std::fs::create_dir_all(&media_dir)?;

        let ext = std::path::Path::new(file_path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();
        let local = media_dir.join(format!("{}{ext}", file_id.replace('/', "_")));
        std::fs::write(&local, &bytes)?;

        info!(path = %local.display(), bytes = bytes.len(), "telegram file downloaded");
        Ok(local.display().to_string())
    }

    async fn send_chunk(&self, chat_id: &str, text: &str, reply_to: Option<&str>) -> anyhow::Result<()> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(id) = reply_to {
            body["reply_to_message_id"] = json!(id.parse::<i64>().unwrap_or_default());
        }

        let resp = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("sendMessage failed: {status} {body}");
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        self.core.name()
    }

    async fn start(&self) -> anyhow::Result<()> {
        info!("telegram channel polling");
        loop {
            tokio::select! {
                result = self.poll_updates() => {
                    match result {
                        Ok(updates) => {
                            for update in &updates {
                                self.handle_update(update).await;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "telegram poll failed, retrying in {RECONNECT_DELAY_SECS}s");
                            tokio::select! {
                                _ = tokio::time::sleep(std::time::Duration::from_secs(RECONNECT_DELAY_SECS)) => {}
                                _ = self.shutdown.notified() => return Ok(()),
                            }
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("telegram channel stopping");
                    return Ok(());
                }
            }
        }
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.shutdown.notify_waiters();
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()> {
        let reply_to = msg
            .reply_to
            .as_deref()
            .or_else(|| msg.metadata.get("reply_to_message_id").map(String::as_str));

        for chunk in split_message(&msg.content, TELEGRAM_MAX_LEN) {
            self.send_chunk(&msg.chat_id, &chunk, reply_to).await?;
        }
        debug!(chat_id = %msg.chat_id, "telegram message sent");
        Ok(())
    }
}

/// Split on line boundaries where possible, hard-split otherwise.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in text.split_inclusive('\n') {
        if current.len() + line.len() > max_len && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if line.len() > max_len {
            // A single oversized line: hard-split at char boundaries.
            let mut rest = line;
            while rest.len() > max_len {
                let mut cut = max_len;
                while !rest.is_char_boundary(cut) {
                    cut -= 1;
                }
                chunks.push(rest[..cut].to_string());
                rest = &rest[cut..];
            }
            current.push_str(rest);
        } else {
            current.push_str(line);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_channel(bus: Arc<MessageBus>, api_base: &str, allow: Vec<String>) -> TelegramChannel {
        TelegramChannel::with_api_base("TOKEN".into(), bus, allow, api_base.to_string())
    }

    #[test]
    fn split_short_message_is_identity() {
        assert_eq!(split_message("hello", 4096), vec!["hello"]);
    }

    #[test]
    fn split_prefers_line_boundaries() {
        let text = format!("{}\n{}", "a".repeat(30), "b".repeat(30));
        let chunks = split_message(&text, 40);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].starts_with('a'));
        assert!(chunks[1].starts_with('b'));
    }

    #[test]
    fn split_hard_cuts_oversized_lines() {
        let text = "x".repeat(100);
        let chunks = split_message(&text, 40);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() <= 40));
        assert_eq!(chunks.concat(), text);
    }

    #[tokio::test]
    async fn update_with_text_reaches_the_bus() {
        let server = MockServer::start().await;
        let bus = Arc::new(MessageBus::new(8));
        let channel = make_channel(bus.clone(), &server.uri(), vec![]);

        let update = json!({
            "update_id": 100,
            "message": {
                "message_id": 7,
                "from": {"id": 42, "username": "alice"},
                "chat": {"id": 4242},
                "text": "hello bot"
            }
        });
        channel.handle_update(&update).await;

        let msg = bus.consume_inbound().await.unwrap();
        assert_eq!(msg.channel, "telegram");
        assert_eq!(msg.sender_id, "42");
        assert_eq!(msg.chat_id, "4242");
        assert_eq!(msg.content, "hello bot");
        assert_eq!(msg.metadata.get("message_id").unwrap(), "7");
        assert_eq!(msg.metadata.get("username").unwrap(), "alice");

        // Offset advanced past the consumed update.
        assert_eq!(channel.offset.load(Ordering::SeqCst), 101);
    }

    #[tokio::test]
    async fn disallowed_sender_never_reaches_the_bus() {
        let server = MockServer::start().await;
        let bus = Arc::new(MessageBus::new(8));
        let channel = make_channel(bus.clone(), &server.uri(), vec!["alice".into()]);

        let update = json!({
            "update_id": 1,
            "message": {
                "message_id": 1,
                "from": {"id": 666, "username": "mallory"},
                "chat": {"id": 1},
                "text": "let me in"
            }
        });
        channel.handle_update(&update).await;

        let got = tokio::time::timeout(
            std::time::Duration::from_millis(30),
            bus.consume_inbound(),
        )
        .await;
        assert!(got.is_err());
    }

    #[tokio::test]
    async fn oversized_attachment_is_refused() {
        let server = MockServer::start().await;
        let bus = Arc::new(MessageBus::new(8));
        let channel = make_channel(bus, &server.uri(), vec![]);

        let err = channel
            .download_file("file-1", MAX_ATTACHMENT_BYTES + 1)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[tokio::test]
    async fn send_posts_to_send_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let bus = Arc::new(MessageBus::new(8));
        let channel = make_channel(bus, &server.uri(), vec![]);
        channel
            .send(&OutboundMessage::new("telegram", "4242", "short reply"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn long_send_is_chunked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(2)
            .mount(&server)
            .await;

        let bus = Arc::new(MessageBus::new(8));
        let channel = make_channel(bus, &server.uri(), vec![]);
        let long = "y".repeat(TELEGRAM_MAX_LEN + 10);
        channel
            .send(&OutboundMessage::new("telegram", "4242", long))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn poll_reads_updates_with_offset() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/botTOKEN/getUpdates"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": [{"update_id": 5, "message": null}]
            })))
            .mount(&server)
            .await;

        let bus = Arc::new(MessageBus::new(8));
        let channel = make_channel(bus, &server.uri(), vec![]);
        let updates = channel.poll_updates().await.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0]["update_id"], 5);
    }

    #[tokio::test]
    async fn stop_is_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/botTOKEN/getUpdates"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true, "result": []}))
                    .set_delay(std::time::Duration::from_millis(200)),
            )
            .mount(&server)
            .await;

        let bus = Arc::new(MessageBus::new(8));
        let channel = Arc::new(make_channel(bus, &server.uri(), vec![]));
        let runner = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.start().await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        channel.stop().await.unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), runner).await;
        assert!(result.is_ok(), "start() did not exit promptly after stop()");
    }
}
