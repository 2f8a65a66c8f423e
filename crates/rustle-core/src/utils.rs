//! Path and string helpers shared across the workspace.

use std::path::PathBuf;

/// The Rustle data directory, `~/.rustle/`.
pub fn data_dir() -> PathBuf {
    home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".rustle")
}

/// Session storage directory, `~/.rustle/sessions/`.
pub fn sessions_dir() -> PathBuf {
    data_dir().join("sessions")
}

/// Downloaded media directory, `~/.rustle/media/`.
pub fn media_dir() -> PathBuf {
    data_dir().join("media")
}

/// Turn a session key into a filesystem-safe file stem: `:` becomes `_` and
/// the characters `<>:"/\|?*` are stripped.
pub fn safe_key(key: &str) -> String {
    key.replace(':', "_")
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .collect()
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("."));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Truncate to `max_len` characters, appending "..." when cut. Unicode-safe.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Today's date as `YYYY-MM-DD`.
pub fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

fn home_dir() -> Option<PathBuf> {
    dirs_next::home_dir()
}
