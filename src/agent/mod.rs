//! Assistant CLI types and the session record the Supervisor tracks for each
//! spawned PTY.

use crate::{ForgeError, Result};
use serde::{Deserialize, Serialize};

/// The fixed set of assistant CLIs the supervisor knows how to spawn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AgentType {
    Claude,
    Gemini,
    Codex,
    Copilot,
    Qwen,
    Llm,
}

impl AgentType {
    /// All six supported CLI types, in the order the router favors default categories.
    pub const ALL: [AgentType; 6] = [
        AgentType::Claude,
        AgentType::Gemini,
        AgentType::Codex,
        AgentType::Copilot,
        AgentType::Qwen,
        AgentType::Llm,
    ];

    /// Parse a CLI type from its wire/CLI-flag name. Unknown names are rejected
    /// at the command boundary rather than defaulted.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "claude" => Ok(AgentType::Claude),
            "gemini" => Ok(AgentType::Gemini),
            "codex" => Ok(AgentType::Codex),
            "copilot" => Ok(AgentType::Copilot),
            "qwen" => Ok(AgentType::Qwen),
            "llm" => Ok(AgentType::Llm),
            other => Err(ForgeError::Validation(format!(
                "unknown cli type '{}'",
                other
            ))),
        }
    }

    /// The shell command used to invoke this CLI.
    pub fn command(&self) -> &'static str {
        match self {
            AgentType::Claude => "claude",
            AgentType::Gemini => "gemini",
            AgentType::Codex => "codex",
            AgentType::Copilot => "gh",
            AgentType::Qwen => "qwen",
            AgentType::Llm => "llm",
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentType::Claude => write!(f, "claude"),
            AgentType::Gemini => write!(f, "gemini"),
            AgentType::Codex => write!(f, "codex"),
            AgentType::Copilot => write!(f, "copilot"),
            AgentType::Qwen => write!(f, "qwen"),
            AgentType::Llm => write!(f, "llm"),
        }
    }
}

/// Lifecycle status of an [`AgentSession`]. Orthogonal to continuation status:
/// a session stays `Active` while its continuation loop starts, stops, and
/// restarts any number of times.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentSessionStatus {
    Active,
    Ended,
}

/// A durable record of one spawned PTY session, mirroring the `AgentSession`
/// row persisted by the [`crate::store::Store`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSession {
    pub id: String,
    pub workspace_id: String,
    pub cli_type: AgentType,
    pub goal: Option<String>,
    pub status: AgentSessionStatus,
    pub iteration_count: u32,
    pub token_input: u64,
    pub token_output: u64,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl AgentSession {
    pub fn new(id: String, workspace_id: String, cli_type: AgentType, goal: Option<String>) -> Self {
        Self {
            id,
            workspace_id,
            cli_type,
            goal,
            status: AgentSessionStatus::Active,
            iteration_count: 0,
            token_input: 0,
            token_output: 0,
            started_at: chrono::Utc::now(),
            ended_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_known_clis() {
        for cli in AgentType::ALL {
            assert_eq!(AgentType::parse(&cli.to_string()).unwrap(), cli);
        }
    }

    #[test]
    fn rejects_unknown_cli() {
        assert!(AgentType::parse("chatgpt").is_err());
    }
}
