//! The message bus: two bounded queues plus outbound fan-out.
//!
//! Channels publish to `inbound`; the agent loop is the single inbound
//! consumer. The agent publishes to `outbound`; the dispatch loop fans each
//! outbound message out to every handler subscribed under its channel name.
//!
//! Queues are bounded: a producer facing a full queue awaits, which is the
//! back-pressure story for bursty adapters.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tracing::{debug, error, info, warn};

use super::types::{InboundMessage, OutboundMessage};

/// An async handler for outbound messages on one channel.
pub type OutboundHandler = Arc<
    dyn Fn(OutboundMessage) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send
        + Sync,
>;

/// The bus connecting channels ↔ agent loop.
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<mpsc::Receiver<InboundMessage>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: Mutex<mpsc::Receiver<OutboundMessage>>,
    subscribers: RwLock<HashMap<String, Vec<OutboundHandler>>>,
}

impl MessageBus {
    /// Create a bus whose queues hold at most `capacity` messages each.
    pub fn new(capacity: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);

        MessageBus {
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: Mutex::new(outbound_rx),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Publish a channel message to the agent. Awaits if the queue is full;
    /// never drops.
    pub async fn publish_inbound(
        &self,
        msg: InboundMessage,
    ) -> Result<(), mpsc::error::SendError<InboundMessage>> {
        self.inbound_tx.send(msg).await
    }

    /// Receive the next inbound message. Single consumer expected (the agent
    /// loop). Returns `None` once all senders are gone.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await
    }

    /// Publish an agent reply toward the channels.
    pub async fn publish_outbound(
        &self,
        msg: OutboundMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.outbound_tx.send(msg).await
    }

    /// Receive the next outbound message directly (used by the dispatch loop
    /// and by tests that bypass it).
    pub async fn consume_outbound(&self) -> Option<OutboundMessage> {
        let mut rx = self.outbound_rx.lock().await;
        rx.recv().await
    }

    /// Register a handler for outbound messages addressed to `channel`.
    pub async fn subscribe_outbound(&self, channel: &str, handler: OutboundHandler) {
        let mut subs = self.subscribers.write().await;
        subs.entry(channel.to_string()).or_default().push(handler);
        debug!(channel = channel, "outbound subscriber registered");
    }

    /// Drain the outbound queue, routing each message to its channel's
    /// subscribers, until `shutdown` is signalled or the queue closes.
    ///
    /// No subscriber → warn and drop. A handler error is logged and the
    /// remaining subscribers still run; one bad handler never stops the loop.
    pub async fn dispatch_outbound_loop(&self, shutdown: Arc<Notify>) {
        info!("outbound dispatcher started");
        loop {
            tokio::select! {
                msg = self.consume_outbound() => {
                    match msg {
                        Some(outbound) => self.dispatch_one(outbound).await,
                        None => {
                            info!("outbound queue closed, dispatcher exiting");
                            return;
                        }
                    }
                }
                _ = shutdown.notified() => {
                    info!("outbound dispatcher shutting down");
                    return;
                }
            }
        }
    }

    /// Route one outbound message to all subscribers of its channel.
    async fn dispatch_one(&self, msg: OutboundMessage) {
        let handlers: Vec<OutboundHandler> = {
            let subs = self.subscribers.read().await;
            match subs.get(&msg.channel) {
                Some(h) if !h.is_empty() => h.clone(),
                _ => {
                    warn!(channel = %msg.channel, "no subscriber for outbound message, dropping");
                    return;
                }
            }
        };

        debug!(
            channel = %msg.channel,
            chat_id = %msg.chat_id,
            subscribers = handlers.len(),
            "dispatching outbound message"
        );

        for handler in handlers {
            if let Err(e) = handler(msg.clone()).await {
                error!(channel = %msg.channel, error = %e, "outbound handler failed");
            }
        }
        // Message is discarded here, after every subscriber was attempted.
    }

    /// Clone of the inbound sender, for adapters and the scheduler.
    pub fn inbound_sender(&self) -> mpsc::Sender<InboundMessage> {
        self.inbound_tx.clone()
    }

    /// Clone of the outbound sender, for the agent loop and tools.
    pub fn outbound_sender(&self) -> mpsc::Sender<OutboundMessage> {
        self.outbound_tx.clone()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn inbound_flow() {
        let bus = MessageBus::new(8);
        bus.publish_inbound(InboundMessage::new("telegram", "u", "c", "hi"))
            .await
            .unwrap();
        let got = bus.consume_inbound().await.unwrap();
        assert_eq!(got.channel, "telegram");
        assert_eq!(got.content, "hi");
    }

    #[tokio::test]
    async fn fifo_ordering_preserved() {
        let bus = MessageBus::new(8);
        for i in 1..=3 {
            bus.publish_inbound(InboundMessage::new("cli", "u", "c", format!("m{i}")))
                .await
                .unwrap();
        }
        assert_eq!(bus.consume_inbound().await.unwrap().content, "m1");
        assert_eq!(bus.consume_inbound().await.unwrap().content, "m2");
        assert_eq!(bus.consume_inbound().await.unwrap().content, "m3");
    }

    #[tokio::test]
    async fn concurrent_producers_both_arrive() {
        let bus = Arc::new(MessageBus::new(8));
        let b1 = bus.clone();
        let b2 = bus.clone();
        let h1 = tokio::spawn(async move {
            b1.publish_inbound(InboundMessage::new("a", "u", "c", "one"))
                .await
                .unwrap();
        });
        let h2 = tokio::spawn(async move {
            b2.publish_inbound(InboundMessage::new("b", "u", "c", "two"))
                .await
                .unwrap();
        });
        h1.await.unwrap();
        h2.await.unwrap();

        let first = bus.consume_inbound().await.unwrap();
        let second = bus.consume_inbound().await.unwrap();
        let channels = [first.channel.as_str(), second.channel.as_str()];
        assert!(channels.contains(&"a"));
        assert!(channels.contains(&"b"));
    }

    fn counting_handler(counter: Arc<AtomicUsize>) -> OutboundHandler {
        Arc::new(move |_msg| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn dispatch_routes_to_matching_subscriber() {
        let bus = Arc::new(MessageBus::new(8));
        let tg = Arc::new(AtomicUsize::new(0));
        let dc = Arc::new(AtomicUsize::new(0));
        bus.subscribe_outbound("telegram", counting_handler(tg.clone()))
            .await;
        bus.subscribe_outbound("discord", counting_handler(dc.clone()))
            .await;

        let shutdown = Arc::new(Notify::new());
        let dispatcher = {
            let bus = bus.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { bus.dispatch_outbound_loop(shutdown).await })
        };

        bus.publish_outbound(OutboundMessage::new("telegram", "c1", "a"))
            .await
            .unwrap();
        bus.publish_outbound(OutboundMessage::new("telegram", "c2", "b"))
            .await
            .unwrap();
        bus.publish_outbound(OutboundMessage::new("discord", "g1", "c"))
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        shutdown.notify_waiters();
        let _ = dispatcher.await;

        assert_eq!(tg.load(Ordering::SeqCst), 2);
        assert_eq!(dc.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatch_drops_unknown_channel() {
        let bus = Arc::new(MessageBus::new(8));
        let shutdown = Arc::new(Notify::new());
        let dispatcher = {
            let bus = bus.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { bus.dispatch_outbound_loop(shutdown).await })
        };

        bus.publish_outbound(OutboundMessage::new("nowhere", "c", "lost"))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        shutdown.notify_waiters();
        // Must not panic or wedge.
        let _ = dispatcher.await;
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_dispatch() {
        let bus = Arc::new(MessageBus::new(8));
        let ok_count = Arc::new(AtomicUsize::new(0));

        let failing: OutboundHandler =
            Arc::new(|_msg| Box::pin(async { anyhow::bail!("handler exploded") }));
        bus.subscribe_outbound("x", failing).await;
        bus.subscribe_outbound("x", counting_handler(ok_count.clone()))
            .await;

        let shutdown = Arc::new(Notify::new());
        let dispatcher = {
            let bus = bus.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { bus.dispatch_outbound_loop(shutdown).await })
        };

        bus.publish_outbound(OutboundMessage::new("x", "c", "first"))
            .await
            .unwrap();
        bus.publish_outbound(OutboundMessage::new("x", "c", "second"))
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        shutdown.notify_waiters();
        let _ = dispatcher.await;

        // The second subscriber ran for both messages despite the first
        // subscriber failing every time.
        assert_eq!(ok_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn sender_clone_feeds_same_queue() {
        let bus = MessageBus::new(8);
        let tx = bus.inbound_sender();
        tx.send(InboundMessage::new("bridge", "u", "c", "via clone"))
            .await
            .unwrap();
        assert_eq!(bus.consume_inbound().await.unwrap().content, "via clone");
    }
}
