//! Workspace entity, skill scanning, and AGENTS.md/CLAUDE.md loading.
//!
//! Treated as pure filesystem readers per spec: a bad or missing file is
//! skipped rather than surfaced, so one broken SKILL.md never blocks a
//! workspace open.

use crate::Result;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// The user's project directory; the unit of scoping for memories, sessions,
/// skills, and context files.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Workspace {
    pub id: String,
    pub path: PathBuf,
    pub name: String,
    pub last_opened: DateTime<Utc>,
    pub pinned: bool,
    pub config: String,
}

/// A parsed `SKILL.md`: YAML frontmatter's `name`/`description`, nothing else.
#[derive(Debug, Clone)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub path: PathBuf,
}

/// Compute the workspace id: first 16 hex chars of the SHA-256 of the
/// canonicalized absolute path.
pub fn workspace_id(path: &Path) -> Result<String> {
    let canonical = path.canonicalize()?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect::<String>()[..16].to_string())
}

/// Open (or re-open) a workspace: validate the directory exists, compute its
/// id, and return a fresh in-memory record ready for the Store to upsert.
pub fn open(path: &Path) -> Result<Workspace> {
    let canonical = path.canonicalize()?;
    if !canonical.is_dir() {
        return Err(crate::ForgeError::Workspace(format!(
            "{} is not a directory",
            canonical.display()
        )));
    }
    let id = workspace_id(&canonical)?;
    let name = canonical
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| canonical.to_string_lossy().to_string());
    Ok(Workspace {
        id,
        path: canonical,
        name,
        last_opened: Utc::now(),
        pinned: false,
        config: "{}".to_string(),
    })
}

const SKILL_GLOB_DIRS: &[&str] = &[".forge/skills", ".claude/skills", ".opencode/skills"];

/// Scan `.forge/skills`, `.claude/skills`, `.opencode/skills` under the
/// workspace, plus `~/.forge/skills`, each `*/SKILL.md`.
pub fn scan_skills(workspace_path: &Path) -> Vec<Skill> {
    let mut out = Vec::new();
    for dir in SKILL_GLOB_DIRS {
        scan_skill_dir(&workspace_path.join(dir), &mut out);
    }
    if let Some(home) = dirs::home_dir() {
        scan_skill_dir(&home.join(".forge/skills"), &mut out);
    }
    out
}

fn scan_skill_dir(dir: &Path, out: &mut Vec<Skill>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let skill_path = entry.path().join("SKILL.md");
        if !skill_path.is_file() {
            continue;
        }
        let contents = match std::fs::read_to_string(&skill_path) {
            Ok(c) => c,
            Err(_) => continue,
        };
        if let Some((name, description)) = parse_skill_frontmatter(&contents) {
            out.push(Skill {
                name,
                description,
                path: skill_path,
            });
        }
    }
}

/// Parse a fenced `---\n...\n---` frontmatter block, extracting `name:` and
/// `description:` by line. Any other shape is silently skipped.
fn parse_skill_frontmatter(contents: &str) -> Option<(String, String)> {
    let mut lines = contents.lines();
    if lines.next()?.trim() != "---" {
        return None;
    }
    let mut name = None;
    let mut description = None;
    for line in lines {
        if line.trim() == "---" {
            break;
        }
        if let Some(value) = line.strip_prefix("name:") {
            name = Some(value.trim().trim_matches('"').to_string());
        } else if let Some(value) = line.strip_prefix("description:") {
            description = Some(value.trim().trim_matches('"').to_string());
        }
    }
    Some((name?, description.unwrap_or_default()))
}

/// Load the first existing of `AGENTS.md`, `CLAUDE.md`, `.forge/AGENTS.md`
/// under the workspace, returned verbatim.
pub fn load_agents_md(workspace_path: &Path) -> Option<String> {
    for candidate in ["AGENTS.md", "CLAUDE.md", ".forge/AGENTS.md"] {
        let candidate_path = workspace_path.join(candidate);
        if let Ok(contents) = std::fs::read_to_string(&candidate_path) {
            return Some(contents);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn computes_stable_16_char_id() {
        let dir = tempfile::tempdir().unwrap();
        let id1 = workspace_id(dir.path()).unwrap();
        let id2 = workspace_id(dir.path()).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(id1.len(), 16);
        assert!(id1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn open_rejects_non_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("not_a_dir");
        fs::write(&file_path, b"hi").unwrap();
        assert!(open(&file_path).is_err());
    }

    #[test]
    fn parses_skill_frontmatter() {
        let contents = "---\nname: deploy\ndescription: Deploys the app\n---\nBody text.\n";
        let (name, description) = parse_skill_frontmatter(contents).unwrap();
        assert_eq!(name, "deploy");
        assert_eq!(description, "Deploys the app");
    }

    #[test]
    fn skips_malformed_frontmatter() {
        assert!(parse_skill_frontmatter("no frontmatter here").is_none());
    }

    #[test]
    fn scans_skill_directory_tree() {
        let dir = tempfile::tempdir().unwrap();
        let skill_dir = dir.path().join(".forge/skills/deploy");
        fs::create_dir_all(&skill_dir).unwrap();
        fs::write(
            skill_dir.join("SKILL.md"),
            "---\nname: deploy\ndescription: ships it\n---\n",
        )
        .unwrap();

        let skills = scan_skills(dir.path());
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].name, "deploy");
    }

    #[test]
    fn loads_first_existing_agents_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("CLAUDE.md"), "hello from claude.md").unwrap();
        let loaded = load_agents_md(dir.path()).unwrap();
        assert_eq!(loaded, "hello from claude.md");
    }

    #[test]
    fn returns_none_when_no_agents_file_present() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_agents_md(dir.path()).is_none());
    }
}
