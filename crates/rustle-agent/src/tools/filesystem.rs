//! Filesystem tools: read, write, edit, list.
//!
//! Each tool optionally confines paths to an allowed directory (the
//! workspace, when `restrictToWorkspace` is on).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::base::{require_string, Tool};

// ─────────────────────────────────────────────
// Path resolution
// ─────────────────────────────────────────────

/// Expand `~`, canonicalize what exists, and enforce the allowed root.
fn resolve_path(path: &str, allowed_dir: Option<&Path>) -> anyhow::Result<PathBuf> {
    let expanded = rustle_core::utils::expand_home(path);

    let resolved = if expanded.exists() {
        expanded.canonicalize().unwrap_or(expanded)
    } else if let Some(parent) = expanded.parent().filter(|p| p.exists()) {
        // The file may not exist yet (writes); anchor on the parent.
        let canon = parent.canonicalize().unwrap_or_else(|_| parent.to_path_buf());
        match expanded.file_name() {
            Some(name) => canon.join(name),
            None => expanded,
        }
    } else {
        expanded
    };

    if let Some(allowed) = allowed_dir {
        let allowed = allowed
            .canonicalize()
            .unwrap_or_else(|_| allowed.to_path_buf());
        if !resolved.starts_with(&allowed) {
            anyhow::bail!(
                "Access denied: path '{}' is outside allowed directory '{}'",
                resolved.display(),
                allowed.display()
            );
        }
    }

    Ok(resolved)
}

// ─────────────────────────────────────────────
// read_file
// ─────────────────────────────────────────────

pub struct ReadFileTool {
    allowed_dir: Option<PathBuf>,
}

impl ReadFileTool {
    pub fn new(allowed_dir: Option<PathBuf>) -> Self {
        Self { allowed_dir }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file and return its full text content."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path to the file"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let path_str = require_string(&params, "path")?;
        let path = resolve_path(&path_str, self.allowed_dir.as_deref())?;

        if !path.is_file() {
            anyhow::bail!("File not found: {}", path.display());
        }
        std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))
    }
}

// ─────────────────────────────────────────────
// write_file
// ─────────────────────────────────────────────

pub struct WriteFileTool {
    allowed_dir: Option<PathBuf>,
}

impl WriteFileTool {
    pub fn new(allowed_dir: Option<PathBuf>) -> Self {
        Self { allowed_dir }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file with the given content. Missing parent \
         directories are created."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Destination path"},
                "content": {"type": "string", "description": "File content"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let path_str = require_string(&params, "path")?;
        let content = require_string(&params, "content")?;
        let path = resolve_path(&path_str, self.allowed_dir.as_deref())?;

        if let Some(parent) = path.parent().filter(|p| !p.exists()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow::anyhow!("Failed to create {}: {e}", parent.display()))?;
        }

        let bytes = content.len();
        std::fs::write(&path, &content)
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", path.display()))?;
        Ok(format!("Wrote {bytes} bytes to {}", path.display()))
    }
}

// ─────────────────────────────────────────────
// edit_file
// ─────────────────────────────────────────────

pub struct EditFileTool {
    allowed_dir: Option<PathBuf>,
}

impl EditFileTool {
    pub fn new(allowed_dir: Option<PathBuf>) -> Self {
        Self { allowed_dir }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace the first occurrence of old_text with new_text in a file. \
         Include enough surrounding context in old_text to make it unique."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File to edit"},
                "old_text": {"type": "string", "description": "Exact text to replace"},
                "new_text": {"type": "string", "description": "Replacement text"}
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let path_str = require_string(&params, "path")?;
        let old_text = require_string(&params, "old_text")?;
        let new_text = require_string(&params, "new_text")?;
        let path = resolve_path(&path_str, self.allowed_dir.as_deref())?;

        if !path.is_file() {
            anyhow::bail!("File not found: {}", path.display());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;

        let occurrences = content.matches(&old_text).count();
        if occurrences == 0 {
            anyhow::bail!("old_text not found in {}", path.display());
        }

        let updated = content.replacen(&old_text, &new_text, 1);
        std::fs::write(&path, updated)
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", path.display()))?;

        if occurrences > 1 {
            Ok(format!(
                "Warning: old_text appears {occurrences} times; replaced the first. Edited {}",
                path.display()
            ))
        } else {
            Ok(format!("Edited {}", path.display()))
        }
    }
}

// ─────────────────────────────────────────────
// list_dir
// ─────────────────────────────────────────────

pub struct ListDirTool {
    allowed_dir: Option<PathBuf>,
}

impl ListDirTool {
    pub fn new(allowed_dir: Option<PathBuf>) -> Self {
        Self { allowed_dir }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List a directory. Directories are suffixed with '/'."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to list"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let path_str = require_string(&params, "path")?;
        let path = resolve_path(&path_str, self.allowed_dir.as_deref())?;

        if !path.is_dir() {
            anyhow::bail!("Not a directory: {}", path.display());
        }

        let mut entries: Vec<(String, bool)> = std::fs::read_dir(&path)
            .map_err(|e| anyhow::anyhow!("Failed to list {}: {e}", path.display()))?
            .filter_map(|e| e.ok())
            .map(|e| {
                let is_dir = e.file_type().map(|t| t.is_dir()).unwrap_or(false);
                (e.file_name().to_string_lossy().into_owned(), is_dir)
            })
            .collect();
        entries.sort();

        if entries.is_empty() {
            return Ok("(empty directory)".into());
        }

        Ok(entries
            .into_iter()
            .map(|(name, is_dir)| if is_dir { format!("{name}/") } else { name })
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
