//! The session store: in-memory cache + JSONL files on disk.
//!
//! The agent loop is the only writer at runtime (turns are serialized by the
//! single inbound consumer), so the `RwLock` here guards the cache map, not
//! the conversations. If a second concurrent writer is ever introduced, a
//! per-session lock becomes necessary.

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::Message;
use crate::utils;

// ─────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────

/// One persisted conversation entry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    /// "system" | "user" | "assistant" | "tool".
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        SessionRecord {
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A conversation: ordered records plus bookkeeping.
#[derive(Clone, Debug)]
pub struct Session {
    pub key: String,
    pub records: Vec<SessionRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

impl Session {
    pub fn new(key: impl Into<String>) -> Self {
        let now = Utc::now();
        Session {
            key: key.into(),
            records: Vec::new(),
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }
}

/// First line of every session file.
#[derive(Debug, Serialize, Deserialize)]
struct MetadataLine {
    #[serde(rename = "_type")]
    record_type: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

// ─────────────────────────────────────────────
// SessionStore
// ─────────────────────────────────────────────

/// Cached, file-backed session storage.
pub struct SessionStore {
    sessions_dir: PathBuf,
    cache: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    /// Open (and create if needed) the store. `dir` defaults to
    /// `~/.rustle/sessions/`.
    pub fn new(dir: Option<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.unwrap_or_else(utils::sessions_dir);
        std::fs::create_dir_all(&dir)?;
        Ok(SessionStore {
            sessions_dir: dir,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Cache → disk → fresh, in that order. A session exists from its first
    /// lookup onward.
    pub fn get_or_create(&self, key: &str) -> Session {
        {
            let cache = self.cache.read().unwrap();
            if let Some(session) = cache.get(key) {
                return session.clone();
            }
        }

        let session = self.load_from_disk(key).unwrap_or_else(|| Session::new(key));
        let mut cache = self.cache.write().unwrap();
        cache.insert(key.to_string(), session.clone());
        session
    }

    /// Append a record and persist the session.
    pub fn append(&self, key: &str, role: &str, content: &str) {
        let mut session = self.get_or_create(key);
        session.records.push(SessionRecord::new(role, content));
        session.updated_at = Utc::now();

        {
            let mut cache = self.cache.write().unwrap();
            cache.insert(key.to_string(), session.clone());
        }
        if let Err(e) = self.save_to_disk(&session) {
            warn!(key = key, error = %e, "failed to persist session");
        }
    }

    /// The tail of the conversation, at most `max_records` entries, projected
    /// to `{role, content}` messages for the LLM.
    pub fn get_history(&self, key: &str, max_records: usize) -> Vec<Message> {
        let session = self.get_or_create(key);
        let skip = session.records.len().saturating_sub(max_records);
        session.records[skip..]
            .iter()
            .filter_map(|r| match r.role.as_str() {
                "system" => Some(Message::system(&r.content)),
                "user" => Some(Message::user(&r.content)),
                "assistant" => Some(Message::assistant(&r.content)),
                other => {
                    debug!(role = other, "skipping unprojectable history record");
                    None
                }
            })
            .collect()
    }

    /// Drop all records but keep the session (and its file).
    pub fn clear(&self, key: &str) {
        let mut session = self.get_or_create(key);
        session.records.clear();
        session.updated_at = Utc::now();
        {
            let mut cache = self.cache.write().unwrap();
            cache.insert(key.to_string(), session.clone());
        }
        if let Err(e) = self.save_to_disk(&session) {
            warn!(key = key, error = %e, "failed to persist cleared session");
        }
    }

    /// Remove a session from cache and disk. Returns whether a file existed.
    pub fn delete(&self, key: &str) -> bool {
        {
            let mut cache = self.cache.write().unwrap();
            cache.remove(key);
        }
        let path = self.session_path(key);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(error = %e, "failed to delete session file");
                return false;
            }
            true
        } else {
            false
        }
    }

    /// All sessions on disk, newest first.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut summaries = Vec::new();
        let entries = match std::fs::read_dir(&self.sessions_dir) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "failed to read sessions directory");
                return summaries;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "jsonl") {
                continue;
            }
            let Ok(file) = std::fs::File::open(&path) else {
                continue;
            };
            let mut lines = std::io::BufReader::new(file).lines();
            if let Some(Ok(first)) = lines.next() {
                if let Ok(meta) = serde_json::from_str::<MetadataLine>(&first) {
                    let key = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .map(|s| s.replacen('_', ":", 1))
                        .unwrap_or_default();
                    summaries.push(SessionSummary {
                        key,
                        created_at: meta.created_at,
                        updated_at: meta.updated_at,
                        path: path.clone(),
                    });
                }
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }

    fn session_path(&self, key: &str) -> PathBuf {
        self.sessions_dir
            .join(format!("{}.jsonl", utils::safe_key(key)))
    }

    fn load_from_disk(&self, key: &str) -> Option<Session> {
        let path = self.session_path(key);
        if !path.exists() {
            return None;
        }

        let file = match std::fs::File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to open session file");
                return None;
            }
        };

        let mut session = Session::new(key);
        for line in std::io::BufReader::new(file).lines() {
            let Ok(line) = line else { continue };
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(meta) = serde_json::from_str::<MetadataLine>(&line) {
                if meta.record_type == "metadata" {
                    session.created_at = meta.created_at;
                    session.updated_at = meta.updated_at;
                    session.metadata = meta.metadata;
                    continue;
                }
            }
            if let Ok(record) = serde_json::from_str::<SessionRecord>(&line) {
                session.records.push(record);
            }
        }

        debug!(key = key, records = session.records.len(), "loaded session");
        Some(session)
    }

    fn save_to_disk(&self, session: &Session) -> std::io::Result<()> {
        let path = self.session_path(&session.key);
        let mut file = std::fs::File::create(&path)?;

        let meta = MetadataLine {
            record_type: "metadata".to_string(),
            created_at: session.created_at,
            updated_at: session.updated_at,
            metadata: session.metadata.clone(),
        };
        writeln!(file, "{}", serde_json::to_string(&meta)?)?;
        for record in &session.records {
            writeln!(file, "{}", serde_json::to_string(record)?)?;
        }
        Ok(())
    }
}

/// Listing entry for the CLI.
#[derive(Clone, Debug)]
pub struct SessionSummary {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub path: PathBuf,
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
