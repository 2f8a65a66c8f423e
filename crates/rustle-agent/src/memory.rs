//! File-based memory.
//!
//! - `memory/MEMORY.md` — long-term facts, overwritten as a whole
//! - `memory/YYYY-MM-DD.md` — daily notes, appended; a date header is added
//!   on the first write of the day
//!
//! The context builder reads memory on every prompt build; the agent writes
//! it through the filesystem tools.

use std::path::{Path, PathBuf};

pub struct MemoryStore {
    memory_dir: PathBuf,
    memory_file: PathBuf,
}

impl MemoryStore {
    /// A store that creates nothing until the first write.
    pub fn new(workspace: &Path) -> Self {
        let memory_dir = workspace.join("memory");
        let memory_file = memory_dir.join("MEMORY.md");
        Self {
            memory_dir,
            memory_file,
        }
    }

    // ────────────── Long-term ──────────────

    /// Empty string when absent.
    pub fn read_long_term(&self) -> String {
        std::fs::read_to_string(&self.memory_file).unwrap_or_default()
    }

    /// Full overwrite.
    pub fn write_long_term(&self, content: &str) -> std::io::Result<()> {
        self.ensure_dir()?;
        std::fs::write(&self.memory_file, content)
    }

    // ────────────── Daily notes ──────────────

    pub fn today_file(&self) -> PathBuf {
        self.memory_dir
            .join(format!("{}.md", rustle_core::utils::today()))
    }

    pub fn read_today(&self) -> String {
        std::fs::read_to_string(self.today_file()).unwrap_or_default()
    }

    /// Append; first write of the day gets a `# YYYY-MM-DD` header.
    pub fn append_today(&self, content: &str) -> std::io::Result<()> {
        self.ensure_dir()?;
        let path = self.today_file();
        if path.exists() {
            let mut existing = std::fs::read_to_string(&path)?;
            existing.push('\n');
            existing.push_str(content);
            std::fs::write(&path, existing)
        } else {
            let header = format!("# {}\n\n{content}", rustle_core::utils::today());
            std::fs::write(&path, header)
        }
    }

    // ────────────── Aggregation ──────────────

    /// Daily note files, newest first.
    pub fn daily_files(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.memory_dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| is_daily_note_name(p))
            .collect();
        files.sort();
        files.reverse();
        files
    }

    /// The last `days` daily notes joined with separators.
    pub fn recent_notes(&self, days: usize) -> String {
        self.daily_files()
            .into_iter()
            .take(days)
            .filter_map(|f| std::fs::read_to_string(&f).ok())
            .filter(|c| !c.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n---\n\n")
    }

    /// The memory block for the system prompt, or `None` when there is
    /// nothing to say.
    pub fn memory_context(&self) -> Option<String> {
        let mut sections = Vec::new();

        let long_term = self.read_long_term();
        if !long_term.trim().is_empty() {
            sections.push(format!("## Long-term Memory\n\n{long_term}"));
        }

        let today_notes = self.read_today();
        if !today_notes.trim().is_empty() {
            sections.push(format!(
                "## Today's Notes ({})\n\n{today_notes}",
                rustle_core::utils::today()
            ));
        }

        if sections.is_empty() {
            None
        } else {
            Some(format!("# Memory\n\n{}", sections.join("\n\n")))
        }
    }

    pub fn memory_dir(&self) -> &Path {
        &self.memory_dir
    }

    pub fn memory_file(&self) -> &Path {
        &self.memory_file
    }

    fn ensure_dir(&self) -> std::io::Result<()> {
        if !self.memory_dir.exists() {
            std::fs::create_dir_all(&self.memory_dir)?;
        }
        Ok(())
    }
}

/// `YYYY-MM-DD.md`, nothing else.
fn is_daily_note_name(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.len() == 13
        && name.ends_with(".md")
        && name.as_bytes()[4] == b'-'
        && name.as_bytes()[7] == b'-'
        && name[..4].chars().all(|c| c.is_ascii_digit())
        && name[5..7].chars().all(|c| c.is_ascii_digit())
        && name[8..10].chars().all(|c| c.is_ascii_digit())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (MemoryStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (MemoryStore::new(dir.path()), dir)
    }

    #[test]
    fn reads_are_empty_before_any_write() {
        let (store, _dir) = make_store();
        assert_eq!(store.read_long_term(), "");
        assert_eq!(store.read_today(), "");
        assert!(!store.memory_dir().exists());
    }

    #[test]
    fn long_term_overwrites() {
        let (store, _dir) = make_store();
        store.write_long_term("fact one").unwrap();
        store.write_long_term("fact two").unwrap();
        assert_eq!(store.read_long_term(), "fact two");
    }

    #[test]
    fn first_daily_write_adds_header() {
        let (store, _dir) = make_store();
        store.append_today("morning note").unwrap();
        let content = store.read_today();
        assert!(content.starts_with(&format!("# {}", rustle_core::utils::today())));
        assert!(content.contains("morning note"));
    }

    #[test]
    fn later_daily_writes_append() {
        let (store, _dir) = make_store();
        store.append_today("first").unwrap();
        store.append_today("second").unwrap();
        let content = store.read_today();
        assert!(content.contains("first"));
        assert!(content.contains("second"));
        // One header only.
        assert_eq!(content.matches("# ").count(), 1);
    }

    #[test]
    fn daily_files_newest_first_ignores_others() {
        let (store, _dir) = make_store();
        store.write_long_term("seed").unwrap(); // creates the dir
        std::fs::write(store.memory_dir().join("2026-03-01.md"), "a").unwrap();
        std::fs::write(store.memory_dir().join("2026-03-02.md"), "b").unwrap();
        std::fs::write(store.memory_dir().join("notes.txt"), "x").unwrap();
        std::fs::write(store.memory_dir().join("2026-3-02.md"), "bad").unwrap();

        let files = store.daily_files();
        assert_eq!(files.len(), 2);
        assert!(files[0].to_string_lossy().contains("2026-03-02"));
    }

    #[test]
    fn recent_notes_takes_latest_n() {
        let (store, _dir) = make_store();
        store.write_long_term("seed").unwrap();
        std::fs::write(store.memory_dir().join("2026-03-01.md"), "day one").unwrap();
        std::fs::write(store.memory_dir().join("2026-03-02.md"), "day two").unwrap();
        std::fs::write(store.memory_dir().join("2026-03-03.md"), "day three").unwrap();

        let recent = store.recent_notes(2);
        assert!(recent.contains("day three"));
        assert!(recent.contains("day two"));
        assert!(!recent.contains("day one"));
    }

    #[test]
    fn memory_context_absent_when_empty() {
        let (store, _dir) = make_store();
        assert!(store.memory_context().is_none());
        store.write_long_term("   \n").unwrap();
        assert!(store.memory_context().is_none());
    }

    #[test]
    fn memory_context_combines_sections() {
        let (store, _dir) = make_store();
        store.write_long_term("likes tea").unwrap();
        store.append_today("met the team").unwrap();

        let ctx = store.memory_context().unwrap();
        assert!(ctx.starts_with("# Memory"));
        assert!(ctx.contains("## Long-term Memory"));
        assert!(ctx.contains("likes tea"));
        assert!(ctx.contains("Today's Notes"));
        assert!(ctx.contains("met the team"));
    }
}
