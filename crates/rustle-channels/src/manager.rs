//! Channel manager — adapter lifecycle and outbound routing.
//!
//! Built from config: only `enabled` entries are constructed, and one
//! adapter failing to construct never blocks the rest. At start, every
//! adapter is subscribed on the bus under its name and the bus's outbound
//! dispatch loop is spawned alongside the adapters, so routing, the
//! unknown-channel warn-and-drop, and handler-error isolation all live in
//! one place.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use rustle_core::bus::queue::MessageBus;
use rustle_core::config::schema::ChannelsConfig;

use crate::base::Channel;
use crate::bridge::BridgeChannel;
use crate::telegram::TelegramChannel;

pub struct ChannelManager {
    channels: HashMap<String, Arc<dyn Channel>>,
    bus: Arc<MessageBus>,
    shutdown: Arc<Notify>,
}

impl ChannelManager {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            channels: HashMap::new(),
            bus,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Instantiate every enabled adapter from config. Misconfigured entries
    /// are logged and skipped.
    pub fn from_config(config: &ChannelsConfig, bus: Arc<MessageBus>) -> Self {
        let mut manager = Self::new(bus.clone());

        if config.telegram.enabled {
            if config.telegram.token.is_empty() {
                error!("telegram enabled but no token configured, skipping");
            } else {
                manager.register(Arc::new(TelegramChannel::new(
                    config.telegram.token.clone(),
                    bus.clone(),
                    config.telegram.allow_from.clone(),
                )));
            }
        }

        if config.bridge.enabled {
            if config.bridge.url.is_empty() {
                error!("bridge enabled but no url configured, skipping");
            } else {
                manager.register(Arc::new(BridgeChannel::new(
                    config.bridge.url.clone(),
                    bus,
                    config.bridge.allow_from.clone(),
                )));
            }
        }

        manager
    }

    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        info!(channel = %name, "channel registered");
        self.channels.insert(name, channel);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Channel>> {
        self.channels.get(name)
    }

    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Start all adapters plus the outbound dispatcher; blocks until
    /// shutdown is signalled.
    pub async fn start_all(&self) -> Result<()> {
        if self.channels.is_empty() {
            warn!("no channels registered, nothing to start");
            return Ok(());
        }

        info!(channels = ?self.channel_names(), "starting channels");

        // Each adapter answers for outbound messages under its own name.
        for (name, channel) in &self.channels {
            let ch = channel.clone();
            self.bus
                .subscribe_outbound(
                    name,
                    Arc::new(move |msg| {
                        let ch = ch.clone();
                        Box::pin(async move { ch.send(&msg).await })
                    }),
                )
                .await;
        }

        let mut handles = Vec::new();
        for (name, channel) in &self.channels {
            let ch = channel.clone();
            let ch_name = name.clone();
            handles.push(tokio::spawn(async move {
                info!(channel = %ch_name, "channel starting");
                if let Err(e) = ch.start().await {
                    error!(channel = %ch_name, error = %e, "channel exited with error");
                }
                info!(channel = %ch_name, "channel stopped");
            }));
        }

        let bus = self.bus.clone();
        let dispatcher_shutdown = self.shutdown.clone();
        handles.push(tokio::spawn(async move {
            bus.dispatch_outbound_loop(dispatcher_shutdown).await;
        }));

        self.shutdown.notified().await;
        info!("channel manager shutting down");
        Ok(())
    }

    /// Cancel the dispatcher, then stop each adapter. Errors are logged,
    /// never propagated.
    pub async fn stop_all(&self) {
        self.shutdown.notify_waiters();
        for (name, channel) in &self.channels {
            debug!(channel = %name, "stopping channel");
            if let Err(e) = channel.stop().await {
                error!(channel = %name, error = %e, "channel stop failed");
            }
        }
        info!("all channels stopped");
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
