//! forge-core: a local, workspace-centric orchestrator for interactive
//! command-line AI assistant sessions.
//!
//! A user opens a project directory (a [`workspace::Workspace`]) and spawns
//! one or more long-lived assistant sessions against it over a PTY. The
//! [`supervisor::Supervisor`] owns those sessions, re-engages them when they
//! idle mid-task via the [`continuation`] loop, and can fan out isolated
//! single-shot runs of one assistant via [`synthesis`], combining their
//! output into a final synthesized session.

pub mod agent;
pub mod cli;
pub mod config;
pub mod continuation;
pub mod ipc;
pub mod pty;
pub mod router;
pub mod store;
pub mod supervisor;
pub mod synthesis;
pub mod workspace;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pty error: {0}")]
    Pty(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("continuation error: {0}")]
    Continuation(String),

    #[error("synthesis error: {0}")]
    Synthesis(String),

    #[error("workspace error: {0}")]
    Workspace(String),

    #[error("invalid argument: {0}")]
    Validation(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ForgeError>;
