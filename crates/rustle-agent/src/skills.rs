//! Skills — markdown playbooks that teach the agent tool combinations.
//!
//! A skill is a `SKILL.md` under `workspace/skills/<name>/` (or a bundled
//! builtin directory). Two loading tiers:
//!
//! 1. `always` skills: full body injected into every system prompt.
//! 2. Everything else: a one-line XML catalogue entry; the LLM reads the
//!    file with `read_file` when it decides the skill is relevant.
//!
//! Frontmatter is the usual `---`-fenced block. Availability requirements
//! (CLI binaries, env vars) live in a `metadata` JSON field:
//!
//! ```text
//! ---
//! name: github
//! description: "Work with GitHub through the gh CLI"
//! metadata: {"rustle":{"always":false,"requires":{"bins":["gh"]}}}
//! ---
//! ```

use std::path::{Path, PathBuf};

use tracing::debug;

// ─────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkillSource {
    /// `workspace/skills/` — wins on name collisions.
    Workspace,
    /// Bundled with the binary.
    Builtin,
}

#[derive(Clone, Debug)]
pub struct SkillInfo {
    pub name: String,
    /// Path to the `SKILL.md`.
    pub path: PathBuf,
    pub source: SkillSource,
}

#[derive(Clone, Debug, Default)]
pub struct SkillRequires {
    pub bins: Vec<String>,
    pub env: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct SkillMeta {
    pub always: bool,
    pub requires: SkillRequires,
    pub description: Option<String>,
}

// ─────────────────────────────────────────────
// SkillsLoader
// ─────────────────────────────────────────────

pub struct SkillsLoader {
    workspace_skills: PathBuf,
    builtin_skills: Option<PathBuf>,
}

impl SkillsLoader {
    pub fn new(workspace: &Path, builtin_skills: Option<PathBuf>) -> Self {
        Self {
            workspace_skills: workspace.join("skills"),
            builtin_skills,
        }
    }

    // ────────────── Discovery ──────────────

    /// All skills, workspace entries shadowing builtins by name. With
    /// `only_available`, skills with unmet requirements are dropped.
    pub fn list_skills(&self, only_available: bool) -> Vec<SkillInfo> {
        let mut skills = Vec::new();

        if self.workspace_skills.is_dir() {
            scan_skill_dirs(&self.workspace_skills, SkillSource::Workspace, &mut skills);
        }
        if let Some(builtin) = self.builtin_skills.as_ref().filter(|p| p.is_dir()) {
            let taken: Vec<String> = skills.iter().map(|s| s.name.clone()).collect();
            let mut found = Vec::new();
            scan_skill_dirs(builtin, SkillSource::Builtin, &mut found);
            skills.extend(found.into_iter().filter(|s| !taken.contains(&s.name)));
        }

        if only_available {
            skills.retain(|s| requirements_met(&self.skill_meta(&s.name).requires));
        }
        skills
    }

    // ────────────── Loading ──────────────

    /// Raw `SKILL.md` content, workspace first.
    pub fn load_skill(&self, name: &str) -> Option<String> {
        let ws = self.workspace_skills.join(name).join("SKILL.md");
        if ws.is_file() {
            return std::fs::read_to_string(&ws).ok();
        }
        let bi = self.builtin_skills.as_ref()?.join(name).join("SKILL.md");
        if bi.is_file() {
            return std::fs::read_to_string(&bi).ok();
        }
        None
    }

    /// Bodies (frontmatter stripped) of the named skills, for direct
    /// injection into the system prompt.
    pub fn load_skill_bodies(&self, names: &[String]) -> String {
        names
            .iter()
            .filter_map(|name| {
                let content = self.load_skill(name)?;
                let body = strip_frontmatter(&content);
                if body.is_empty() {
                    None
                } else {
                    Some(format!("### Skill: {name}\n\n{body}"))
                }
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n")
    }

    /// XML catalogue of every skill: name, description, file location, and
    /// availability with missing requirements spelled out.
    pub fn build_skills_summary(&self) -> String {
        let skills = self.list_skills(false);
        if skills.is_empty() {
            return String::new();
        }

        let mut lines = vec!["<skills>".to_string()];
        for skill in &skills {
            let meta = self.skill_meta(&skill.name);
            let available = requirements_met(&meta.requires);
            let desc = meta.description.as_deref().unwrap_or(&skill.name);

            lines.push(format!(
                "  <skill available=\"{}\">",
                if available { "true" } else { "false" }
            ));
            lines.push(format!("    <name>{}</name>", escape_xml(&skill.name)));
            lines.push(format!("    <description>{}</description>", escape_xml(desc)));
            lines.push(format!("    <location>{}</location>", skill.path.display()));
            if !available {
                let missing = missing_requirements(&meta.requires);
                if !missing.is_empty() {
                    lines.push(format!("    <requires>{}</requires>", escape_xml(&missing)));
                }
            }
            lines.push("  </skill>".to_string());
        }
        lines.push("</skills>".to_string());
        lines.join("\n")
    }

    /// Names of available skills marked always-load.
    pub fn always_skills(&self) -> Vec<String> {
        self.list_skills(true)
            .iter()
            .filter(|s| self.skill_meta(&s.name).always)
            .map(|s| s.name.clone())
            .collect()
    }

    // ────────────── Metadata ──────────────

    pub fn skill_meta(&self, name: &str) -> SkillMeta {
        let Some(content) = self.load_skill(name) else {
            return SkillMeta::default();
        };
        let Some(frontmatter) = parse_frontmatter(&content) else {
            return SkillMeta::default();
        };

        let description = frontmatter
            .iter()
            .find(|(k, _)| k == "description")
            .map(|(_, v)| v.trim_matches('"').trim_matches('\'').to_string());

        let always_top = frontmatter
            .iter()
            .find(|(k, _)| k == "always")
            .map(|(_, v)| v == "true")
            .unwrap_or(false);

        let metadata_json = frontmatter
            .iter()
            .find(|(k, _)| k == "metadata")
            .map(|(_, v)| v.as_str())
            .unwrap_or("");
        let (meta_always, requires) = parse_skill_metadata(metadata_json);

        SkillMeta {
            always: always_top || meta_always,
            requires,
            description,
        }
    }
}

// ─────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────

fn scan_skill_dirs(dir: &Path, source: SkillSource, out: &mut Vec<SkillInfo>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let skill_file = path.join("SKILL.md");
        if !skill_file.is_file() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            debug!(name, source = ?source, "skill discovered");
            out.push(SkillInfo {
                name: name.to_string(),
                path: skill_file,
                source: source.clone(),
            });
        }
    }
}

/// Line-based `key: value` parse of the `---` fenced block. Deliberately
/// naive; skill frontmatter stays flat.
fn parse_frontmatter(content: &str) -> Option<Vec<(String, String)>> {
    let rest = content.strip_prefix("---")?;
    let end = rest.find("\n---")?;
    let mut pairs = Vec::new();
    for line in rest[..end].lines() {
        if let Some(idx) = line.find(':') {
            let key = line[..idx].trim();
            if !key.is_empty() {
                pairs.push((key.to_string(), line[idx + 1..].trim().to_string()));
            }
        }
    }
    Some(pairs)
}

/// `{"rustle":{"always":bool,"requires":{"bins":[...],"env":[...]}}}`
fn parse_skill_metadata(raw: &str) -> (bool, SkillRequires) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return (false, SkillRequires::default());
    };
    let Some(section) = value.get("rustle") else {
        return (false, SkillRequires::default());
    };

    let always = section
        .get("always")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let string_list = |v: Option<&serde_json::Value>| -> Vec<String> {
        v.and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|s| s.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    };

    let requires = section
        .get("requires")
        .map(|r| SkillRequires {
            bins: string_list(r.get("bins")),
            env: string_list(r.get("env")),
        })
        .unwrap_or_default();

    (always, requires)
}

fn strip_frontmatter(content: &str) -> &str {
    let Some(rest) = content.strip_prefix("---") else {
        return content;
    };
    match rest.find("\n---") {
        Some(end) => rest[end + 4..].trim_start_matches('\n'),
        None => content,
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn requirements_met(requires: &SkillRequires) -> bool {
    requires.bins.iter().all(|b| binary_on_path(b))
        && requires.env.iter().all(|e| std::env::var(e).is_ok())
}

fn missing_requirements(requires: &SkillRequires) -> String {
    let mut missing = Vec::new();
    for bin in &requires.bins {
        if !binary_on_path(bin) {
            missing.push(format!("CLI: {bin}"));
        }
    }
    for var in &requires.env {
        if std::env::var(var).is_err() {
            missing.push(format!("ENV: {var}"));
        }
    }
    missing.join(", ")
}

fn binary_on_path(name: &str) -> bool {
    let Ok(path_var) = std::env::var("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| dir.join(name).is_file())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
