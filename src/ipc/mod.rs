//! Transport-agnostic command/event surface between a UI collaborator and
//! the Supervisor, as serde-tagged enums. No socket here: the reference
//! binding in this crate is in-process, with the CLI constructing these
//! directly.

use serde::{Deserialize, Serialize};

/// Request/response commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    WorkspaceOpen { path: String },
    WorkspaceList,
    WorkspaceGet { workspace_id: String },
    WorkspacePickDirectory,
    WorkspaceGetSkills { workspace_id: String },
    WorkspaceGetAgentsMd { workspace_id: String },
    WorkspaceActiveSessions { workspace_id: String },

    MemoryStore {
        workspace_id: String,
        key: String,
        content: String,
        category: Option<String>,
    },
    MemorySearch { workspace_id: String, query: String },
    MemoryList { workspace_id: String, category: Option<String> },
    MemoryDelete { workspace_id: String, key: String },

    AgentRoute { goal: String, preferred: Option<String> },

    ShellSpawn {
        cli_type: String,
        workspace_path: String,
        workspace_id: String,
        goal: Option<String>,
        one_shot_loop: bool,
        shell_session: bool,
        resume_session_id: Option<String>,
    },
    ShellList,
    ShellKill { pty_id: String },
    ShellOpenExternal { url: String },
    ShellOpenPath { path: String },

    ContinuationStart {
        pty_id: String,
        workspace_id: String,
        goal: String,
        max_iterations: Option<u32>,
        /// Gates re-engagement on an idle prompt; `None` means `true`,
        /// the safe default (see `Supervisor::continuation_start`).
        require_prompt: Option<bool>,
    },
    ContinuationStop { pty_id: String },
    ContinuationState { pty_id: String },

    EnsembleSynthesis {
        workspace_id: String,
        workspace_path: String,
        goal: String,
        n: Option<u32>,
    },
}

/// Fire-and-forget commands: no response is awaited.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FireAndForget {
    ShellWrite { pty_id: String, data: Vec<u8> },
    ShellResize { pty_id: String, cols: u16, rows: u16 },
    WindowMinimize,
    WindowMaximize,
    WindowClose,
}

/// Response payload for a [`Command`]: either a success value or an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ok,
    Workspace { workspace: crate::workspace::Workspace },
    Workspaces { workspaces: Vec<crate::workspace::Workspace> },
    Skills { skills: Vec<SkillPayload> },
    AgentsMd { content: Option<String> },
    Sessions { sessions: Vec<crate::agent::AgentSession> },
    Route { result: RoutePayload },
    Spawned { pty_id: String },
    Memories { memories: Vec<MemoryPayload> },
    ContinuationState { checkpoint: Option<ContinuationPayload> },
    Synthesis { count: u32, session_id: String, job_id: String },
    Error { message: String },
}

/// Serializable mirror of [`crate::workspace::Skill`] (its `PathBuf` field
/// is not meant to round-trip over the wire as a native path type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillPayload {
    pub name: String,
    pub description: String,
    pub path: String,
}

impl From<crate::workspace::Skill> for SkillPayload {
    fn from(skill: crate::workspace::Skill) -> Self {
        Self {
            name: skill.name,
            description: skill.description,
            path: skill.path.to_string_lossy().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutePayload {
    pub cli: String,
    pub category: String,
    pub rationale: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryPayload {
    pub key: String,
    pub content: String,
    pub category: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuationPayload {
    pub pty_id: String,
    pub current_iteration: u32,
    pub max_iterations: u32,
    pub status: String,
}

/// Events pushed from the Supervisor to the UI collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    ShellData { pty_id: String, chunk: Vec<u8> },
    ShellExit { pty_id: String, code: i32 },
    ContinuationIteration { pty_id: String, iteration: u32, max: u32 },
    ContinuationDone { pty_id: String, iterations: u32 },
    ContinuationMaxReached { pty_id: String, iterations: u32, goal: String },
    EnsembleProgress {
        job_id: String,
        workspace_id: String,
        goal: String,
        completed: u32,
        total: u32,
    },
    EnsembleDone {
        job_id: String,
        workspace_id: String,
        goal: String,
        session_id: String,
        total: u32,
    },
}

/// `shell.openExternal` accepts only `http`/`https` URLs.
pub fn validate_external_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_schemes() {
        assert!(!validate_external_url("file:///etc/passwd"));
        assert!(!validate_external_url("javascript:alert(1)"));
        assert!(validate_external_url("https://example.com"));
        assert!(validate_external_url("http://example.com"));
    }

    #[test]
    fn command_round_trips_through_json() {
        let command = Command::ShellSpawn {
            cli_type: "claude".to_string(),
            workspace_path: "/tmp/proj".to_string(),
            workspace_id: "abc123".to_string(),
            goal: Some("fix it".to_string()),
            one_shot_loop: false,
            shell_session: false,
            resume_session_id: None,
        };
        let json = serde_json::to_string(&command).unwrap();
        let round_tripped: Command = serde_json::from_str(&json).unwrap();
        matches!(round_tripped, Command::ShellSpawn { .. });
    }
}
