//! Context builder — everything the LLM sees for a turn.
//!
//! The system prompt is assembled from, in order and when non-empty:
//! identity block, bootstrap documents, memory, always-on skill bodies, and
//! the skills catalogue, joined by `---` separators. The per-turn message
//! list is `[system] + history + current user turn`, where the user turn
//! becomes multipart when image attachments are present.

use std::path::PathBuf;

use base64::Engine;
use chrono::Utc;
use tracing::debug;

use rustle_core::types::{ContentPart, ImageUrl, MediaAttachment, Message};

use crate::memory::MemoryStore;
use crate::skills::SkillsLoader;

/// Injected from the workspace root when present, in this order.
const BOOTSTRAP_FILES: &[&str] = &["AGENTS.md", "SOUL.md", "USER.md", "TOOLS.md", "IDENTITY.md"];

/// Separator between system prompt sections.
const SECTION_SEPARATOR: &str = "\n\n---\n\n";

// ─────────────────────────────────────────────
// ContextBuilder
// ─────────────────────────────────────────────

pub struct ContextBuilder {
    workspace: PathBuf,
    agent_name: String,
    memory: MemoryStore,
    skills: SkillsLoader,
}

impl ContextBuilder {
    pub fn new(workspace: impl Into<PathBuf>, agent_name: impl Into<String>) -> Self {
        let workspace = workspace.into();
        let memory = MemoryStore::new(&workspace);
        let skills = SkillsLoader::new(&workspace, None);
        Self {
            workspace,
            agent_name: agent_name.into(),
            memory,
            skills,
        }
    }

    /// Point at a bundled skills directory.
    pub fn with_builtin_skills(mut self, path: PathBuf) -> Self {
        self.skills = SkillsLoader::new(&self.workspace, Some(path));
        self
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn skills(&self) -> &SkillsLoader {
        &self.skills
    }

    // ────────────── System prompt ──────────────

    pub fn build_system_prompt(&self) -> String {
        let mut parts: Vec<String> = vec![self.identity_block()];

        for filename in BOOTSTRAP_FILES {
            let path = self.workspace.join(filename);
            if path.is_file() {
                if let Ok(content) = std::fs::read_to_string(&path) {
                    debug!(file = filename, "bootstrap file loaded");
                    parts.push(format!("## {filename}\n\n{content}"));
                }
            }
        }

        if let Some(memory) = self.memory.memory_context() {
            parts.push(memory);
        }

        let always = self.skills.always_skills();
        if !always.is_empty() {
            let bodies = self.skills.load_skill_bodies(&always);
            if !bodies.is_empty() {
                parts.push(format!("# Active Skills\n\n{bodies}"));
            }
        }

        let catalogue = self.skills.build_skills_summary();
        if !catalogue.is_empty() {
            parts.push(format!(
                "# Skills\n\n\
                 The following skills extend your capabilities. To use one, \
                 read its SKILL.md with the `read_file` tool first.\n\
                 Skills with available=\"false\" need their dependencies \
                 installed before they work.\n\n{catalogue}"
            ));
        }

        parts.join(SECTION_SEPARATOR)
    }

    fn identity_block(&self) -> String {
        let now = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let os = std::env::consts::OS;
        let arch = std::env::consts::ARCH;
        let workspace = self.workspace.display();
        let memory_file = self.memory.memory_file().display();
        let today = rustle_core::utils::today();

        format!(
            "# Identity\n\n\
             You are **{name}**, an AI assistant.\n\n\
             - **Date/time**: {now}\n\
             - **Runtime**: Rust on {os}/{arch}\n\
             - **Workspace**: `{workspace}`\n\n\
             You have tools for files, shell, web, messaging, scheduling, and \
             background tasks. Prefer tools over guessing; be concise.\n\n\
             When responding to a question, reply directly with text. Only \
             call the `message` tool to reach a specific chat channel; a \
             normal reply needs no tool.\n\n\
             ## Memory\n\n\
             Persist important facts to `{memory_file}` with `write_file` or \
             `edit_file`. Daily notes go to `{workspace}/memory/{today}.md`.",
            name = self.agent_name,
        )
    }

    // ────────────── Message assembly ──────────────

    /// `[system + session block] + history + user turn`.
    pub fn build_messages(
        &self,
        history: &[Message],
        user_text: &str,
        media: &[MediaAttachment],
        channel: &str,
        chat_id: &str,
    ) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 2);

        let mut system = self.build_system_prompt();
        system.push_str(&format!(
            "\n\n## Current Session\nChannel: {channel}\nChat ID: {chat_id}"
        ));
        messages.push(Message::system(system));

        messages.extend_from_slice(history);
        messages.push(build_user_turn(user_text, media));
        messages
    }
}

/// Plain text without attachments; image parts (then the text part) with.
/// Only `image/*` attachments are included — everything else is dropped
/// silently, its content already represented in the text.
fn build_user_turn(text: &str, media: &[MediaAttachment]) -> Message {
    let mut parts: Vec<ContentPart> = Vec::new();

    for attachment in media.iter().filter(|m| m.is_image()) {
        let Ok(bytes) = std::fs::read(&attachment.path) else {
            debug!(path = %attachment.path, "unreadable attachment skipped");
            continue;
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        parts.push(ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:{};base64,{encoded}", attachment.mime_type),
                detail: None,
            },
        });
    }

    if parts.is_empty() {
        return Message::user(text);
    }
    parts.push(ContentPart::Text {
        text: text.to_string(),
    });
    Message::user_parts(parts)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
