//! Rustle core — the shared foundation of the runtime.
//!
//! - [`types`] — chat messages, tool calls, LLM responses (OpenAI wire shape)
//! - [`bus`] — the in-process message bus connecting channels and the agent
//! - [`session`] — per-conversation history with JSONL persistence
//! - [`config`] — configuration schema, loading, env overrides
//! - [`utils`] — path and string helpers

pub mod bus;
pub mod config;
pub mod session;
pub mod types;
pub mod utils;
