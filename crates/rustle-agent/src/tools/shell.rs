//! Shell execution tool.
//!
//! Commands run under `sh -c` (or `cmd /C` on Windows) with a configurable
//! timeout, a deny-pattern guard for obviously destructive commands, and an
//! optional workspace restriction that refuses path traversal and absolute
//! paths outside the working directory.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{info, warn};

use super::base::{optional_string, require_string, Tool};

/// Output above this is truncated before it reaches the LLM.
const MAX_OUTPUT_LEN: usize = 10_000;

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Commands that are never run, restricted mode or not.
const DENY_PATTERNS: &[&str] = &[
    r"\brm\s+-[rf]{1,2}\b",
    r"\bdel\s+/[fq]\b",
    r"\brmdir\s+/s\b",
    r"\b(format|mkfs|diskpart)\b",
    r"\bdd\s+if=",
    r">\s*/dev/sd",
    r"\b(shutdown|reboot|poweroff)\b",
    r":\(\)\s*\{.*\};\s*:", // fork bomb
];

// ─────────────────────────────────────────────
// ExecTool
// ─────────────────────────────────────────────

pub struct ExecTool {
    working_dir: PathBuf,
    timeout: Duration,
    restrict_to_workspace: bool,
    deny_regexes: Vec<Regex>,
}

impl ExecTool {
    pub fn new(working_dir: PathBuf, timeout_secs: Option<u64>, restrict_to_workspace: bool) -> Self {
        let deny_regexes = DENY_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        Self {
            working_dir,
            timeout: Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            restrict_to_workspace,
            deny_regexes,
        }
    }

    /// Returns the refusal message when a command must not run.
    fn guard_command(&self, command: &str, cwd: &str) -> Option<String> {
        let lower = command.to_lowercase();
        for re in &self.deny_regexes {
            if re.is_match(&lower) {
                warn!(command = command, "command blocked by safety guard");
                return Some(
                    "Error: Command blocked by safety guard (dangerous pattern detected)".into(),
                );
            }
        }

        if self.restrict_to_workspace {
            if command.contains("../") || command.contains("..\\") {
                return Some(
                    "Error: Command blocked — path traversal (../) not allowed in restricted mode"
                        .into(),
                );
            }

            let cwd_path = PathBuf::from(cwd);
            if let Ok(re) = Regex::new(r#"(?:/[^\s"']+|[A-Za-z]:\\[^\s"']+)"#) {
                for hit in re.find_iter(command) {
                    let p = PathBuf::from(hit.as_str());
                    let resolved = if p.exists() { p.canonicalize().unwrap_or(p) } else { p };
                    if !resolved.starts_with(&cwd_path) {
                        return Some(format!(
                            "Error: Command references path '{}' outside workspace",
                            hit.as_str()
                        ));
                    }
                }
            }
        }

        None
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Run a shell command and return stdout/stderr. Use for builds, git, \
         and other CLI work."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "Shell command to run"},
                "working_dir": {
                    "type": "string",
                    "description": "Working directory (defaults to the workspace)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let command = require_string(&params, "command")?;
        let cwd = optional_string(&params, "working_dir")
            .unwrap_or_else(|| self.working_dir.to_string_lossy().into_owned());

        if let Some(refusal) = self.guard_command(&command, &cwd) {
            // Refusals are tool output, not errors: the LLM should read them.
            return Ok(refusal);
        }

        info!(command = %command, cwd = %cwd, "running shell command");

        let (shell, flag) = if cfg!(target_os = "windows") {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };

        let child = Command::new(shell)
            .arg(flag)
            .arg(&command)
            .current_dir(&cwd)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to spawn command: {e}"))?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let code = output.status.code().unwrap_or(-1);

                let mut parts = Vec::new();
                if !stdout.is_empty() {
                    parts.push(stdout.into_owned());
                }
                if !stderr.is_empty() {
                    parts.push(format!("STDERR:\n{stderr}"));
                }
                if code != 0 {
                    parts.push(format!("Exit code: {code}"));
                }

                let mut combined = if parts.is_empty() {
                    "(no output)".to_string()
                } else {
                    parts.join("\n")
                };

                if combined.len() > MAX_OUTPUT_LEN {
                    let dropped = combined.len() - MAX_OUTPUT_LEN;
                    combined.truncate(MAX_OUTPUT_LEN);
                    combined.push_str(&format!("\n... (truncated, {dropped} more bytes)"));
                }
                Ok(combined)
            }
            Ok(Err(e)) => anyhow::bail!("Command failed: {e}"),
            Err(_) => Ok(format!(
                "Error: Command timed out after {} seconds",
                self.timeout.as_secs()
            )),
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
