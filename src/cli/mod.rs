//! CLI command definitions: a thin `clap` surface over the Supervisor's
//! command set, bound in-process by `main.rs` rather than over a socket.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "forge")]
#[command(about = "Local, workspace-centric orchestrator for interactive CLI AI assistant sessions", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Open, list, and inspect workspaces
    Workspace {
        #[command(subcommand)]
        command: WorkspaceCommands,
    },
    /// Spawn and control PTY-attached assistant sessions
    Shell {
        #[command(subcommand)]
        command: ShellCommands,
    },
    /// Route a task description to the best-fit assistant CLI
    Agent {
        #[command(subcommand)]
        command: AgentCommands,
    },
    /// Store, search, and list per-workspace memories
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },
    /// Drive the continuation loop for a running session
    Continuation {
        #[command(subcommand)]
        command: ContinuationCommands,
    },
    /// Run best-of-N synthesis against one assistant CLI
    Ensemble {
        #[command(subcommand)]
        command: EnsembleCommands,
    },
}

#[derive(Subcommand)]
pub enum WorkspaceCommands {
    /// Open (or re-open) a workspace directory
    Open { path: PathBuf },
    /// List recently opened workspaces
    List,
    /// List skills discovered under a workspace
    Skills { workspace_path: PathBuf },
    /// Print the workspace's AGENTS.md/CLAUDE.md, if any
    AgentsMd { workspace_path: PathBuf },
    /// List active assistant sessions for a workspace
    Sessions { workspace_id: String },
}

#[derive(Subcommand)]
pub enum ShellCommands {
    /// Spawn a new assistant session and attach to it
    Spawn {
        /// Assistant CLI: claude, gemini, codex, copilot, qwen, llm
        #[arg(long, default_value = "claude")]
        cli: String,
        /// Workspace directory the session runs in
        #[arg(long)]
        workspace_path: PathBuf,
        /// Initial goal, delivered to the shell shortly after spawn
        #[arg(long)]
        goal: Option<String>,
        /// Drive a one-shot-loop instead of an interactive session (claude only)
        #[arg(long)]
        one_shot_loop: bool,
        /// Spawn a plain shell instead of an assistant CLI
        #[arg(long)]
        shell_session: bool,
        /// Resume an existing claude session id instead of starting fresh
        #[arg(long)]
        resume: Option<String>,
        /// Print the pty id and exit instead of attaching
        #[arg(long)]
        no_attach: bool,
    },
    /// Write raw bytes to a session's stdin
    Write { pty_id: String, data: String },
    /// Resize a session's terminal
    Resize { pty_id: String, cols: u16, rows: u16 },
    /// Kill a running session
    Kill { pty_id: String },
}

#[derive(Subcommand)]
pub enum AgentCommands {
    /// Route a task description, optionally pinning a preferred CLI
    Route {
        goal: String,
        #[arg(long)]
        preferred: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum MemoryCommands {
    /// Store (or update) a memory under a workspace
    Store {
        workspace_id: String,
        key: String,
        content: String,
        /// core, daily, or conversation
        #[arg(long)]
        category: Option<String>,
    },
    /// Full-text search a workspace's memories
    Search { workspace_id: String, query: String },
    /// List a workspace's memories, optionally filtered by category
    List {
        workspace_id: String,
        #[arg(long)]
        category: Option<String>,
    },
    /// Delete a memory by key
    Delete { workspace_id: String, key: String },
}

#[derive(Subcommand)]
pub enum ContinuationCommands {
    /// Start re-engaging an idle session toward a goal
    Start {
        pty_id: String,
        goal: String,
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Re-engage after every quiet period instead of waiting for an
        /// idle prompt. Off by default: without it, `continue` is only
        /// written once the session looks like it's actually waiting.
        #[arg(long)]
        no_require_prompt: bool,
    },
    /// Stop a running continuation loop
    Stop { pty_id: String },
    /// Print a continuation loop's current state
    State { pty_id: String },
}

#[derive(Subcommand)]
pub enum EnsembleCommands {
    /// Run N isolated runs of one CLI and synthesize a final answer
    Synthesis {
        #[arg(long, default_value = "claude")]
        cli: String,
        workspace_path: PathBuf,
        goal: String,
        #[arg(long)]
        n: Option<u32>,
    },
}
