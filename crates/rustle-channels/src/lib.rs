//! Channel adapters — the bridges between external transports and the bus.
//!
//! - [`base`]: the `Channel` trait and the shared access-control/publish core
//! - [`manager`]: lifecycle supervision and outbound routing
//! - [`telegram`]: long-polling Telegram bot adapter
//! - [`bridge`]: generic WebSocket bridge adapter

pub mod base;
pub mod bridge;
pub mod manager;
pub mod telegram;

pub use base::{Channel, ChannelCore};
pub use bridge::BridgeChannel;
pub use manager::ChannelManager;
pub use telegram::TelegramChannel;
