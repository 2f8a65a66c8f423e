//! Session persistence — rolling per-conversation history.
//!
//! One JSONL file per session under `~/.rustle/sessions/`:
//! - line 1: `{"_type":"metadata","createdAt":...,"updatedAt":...,"metadata":{}}`
//! - lines 2+: `{"role":"user","content":"...","timestamp":"..."}`

pub mod store;

pub use store::{Session, SessionRecord, SessionStore, SessionSummary};
