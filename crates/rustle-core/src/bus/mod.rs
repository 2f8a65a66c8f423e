//! Message bus — the in-process fabric between channels and the agent.
//!
//! Two bounded FIFO queues (inbound, outbound) plus a per-channel outbound
//! subscriber registry for fan-out to adapters.

pub mod queue;
pub mod types;

pub use queue::{MessageBus, OutboundHandler};
pub use types::{InboundMessage, OutboundMessage};
