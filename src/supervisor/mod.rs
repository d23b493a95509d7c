//! Owns the session map keyed by `ptyId` and wires the Router, PTY
//! Manager, Continuation Engine, and Synthesis Orchestrator together
//! behind a single command surface.
//!
//! Single-writer discipline: nothing but the Supervisor's own task ever
//! touches the session map. PTY output and timers are forwarded over
//! channels it owns and drains itself, so handlers never race each other.

use crate::agent::{AgentSession, AgentType};
use crate::config::AppConfig;
use crate::continuation::{ContinuationEngine, ContinuationEvent, ContinueAction, StartOptions};
use crate::ipc::Event;
use crate::pty::{PtyEvent, PtyManager, PtySpec};
use crate::router;
use crate::store::{MemoryCategory, Store};
use crate::workspace::{self, Workspace};
use crate::{ForgeError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

/// One-shot-loop sentinel marker, unique per spawn so two concurrent loops
/// in the same terminal history can't be confused for each other.
fn generate_marker(pty_id: &str) -> String {
    format!("__FORGE_DONE_{}__", pty_id)
}

/// Supervisor-side metadata for a live PTY. `PtyManager` itself only knows
/// about raw process plumbing; this is where `cliType`/`workspaceId`/
/// one-shot-loop state lives.
struct SessionMeta {
    workspace_id: String,
    agent_session_id: String,
    one_shot_loop: bool,
    one_shot_command: Option<String>,
    marker: Option<String>,
}

/// Mode a `shell.spawn` call runs in.
pub enum SpawnMode {
    Interactive { goal: Option<String> },
    Resume { session_id: String },
    OneShotLoop { goal: String },
    ShellSession,
}

pub struct Supervisor {
    store: Store,
    pty: PtyManager,
    continuation: ContinuationEngine,
    config: AppConfig,
    sessions: HashMap<String, SessionMeta>,
    pty_events: mpsc::UnboundedReceiver<PtyEvent>,
    continuation_fire: mpsc::UnboundedReceiver<String>,
    continuation_events: mpsc::UnboundedReceiver<ContinuationEvent>,
    goal_kickoffs_tx: mpsc::UnboundedSender<(String, Vec<u8>)>,
    goal_kickoffs_rx: mpsc::UnboundedReceiver<(String, Vec<u8>)>,
    ui_events: mpsc::UnboundedSender<Event>,
}

impl Supervisor {
    pub fn new(store: Store, config: AppConfig) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (pty_tx, pty_events) = mpsc::unbounded_channel();
        let (continuation_tx, continuation_events) = mpsc::unbounded_channel();
        let (continuation_engine, continuation_fire) = ContinuationEngine::new(continuation_tx);
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let (goal_kickoffs_tx, goal_kickoffs_rx) = mpsc::unbounded_channel();

        (
            Self {
                store,
                pty: PtyManager::new(pty_tx),
                continuation: continuation_engine,
                config,
                sessions: HashMap::new(),
                pty_events,
                continuation_fire,
                continuation_events,
                goal_kickoffs_tx,
                goal_kickoffs_rx,
                ui_events: ui_tx,
            },
            ui_rx,
        )
    }

    /// Drain every pending PTY/continuation/kickoff event. Call this from
    /// the owning task's event loop.
    pub fn pump_events(&mut self) {
        while let Ok((pty_id, data)) = self.goal_kickoffs_rx.try_recv() {
            self.pty.write(&pty_id, &data);
        }
        while let Ok(event) = self.pty_events.try_recv() {
            self.handle_pty_event(event);
        }
        while let Ok(pty_id) = self.continuation_fire.try_recv() {
            if let Some(action) = self.continuation.on_timer_fire(&pty_id) {
                self.apply_continue_action(&pty_id, action);
            }
        }
        while let Ok(event) = self.continuation_events.try_recv() {
            self.handle_continuation_event(event);
        }
    }

    fn handle_pty_event(&mut self, event: PtyEvent) {
        match event {
            PtyEvent::Data { pty_id, chunk } => {
                self.continuation.on_output(&pty_id, &String::from_utf8_lossy(&chunk));

                let forwarded = match self.sessions.get(&pty_id) {
                    Some(meta) if meta.marker.is_some() => {
                        strip_marker_lines(&chunk, meta.marker.as_deref().unwrap())
                    }
                    _ => chunk,
                };
                self.ui_events
                    .send(Event::ShellData {
                        pty_id,
                        chunk: forwarded,
                    })
                    .ok();
            }
            PtyEvent::Exit { pty_id, code } => {
                if let Some(meta) = self.sessions.remove(&pty_id) {
                    self.store.end_agent_session(&meta.agent_session_id).ok();
                }
                self.continuation.stop(&pty_id);
                self.store.delete_continuation_state(&pty_id).ok();
                self.ui_events.send(Event::ShellExit { pty_id, code }).ok();
            }
        }
    }

    fn handle_continuation_event(&mut self, event: ContinuationEvent) {
        match event {
            ContinuationEvent::Iteration { pty_id, iteration } => {
                if let Some(meta) = self.sessions.get(&pty_id) {
                    self.store.increment_session_iteration(&meta.agent_session_id).ok();
                }
                self.store
                    .update_continuation_iteration(&pty_id, iteration)
                    .ok();
                let max = self
                    .continuation
                    .state(&pty_id)
                    .map(|s| s.max_iterations)
                    .unwrap_or(self.config.default_max_iterations);
                self.ui_events
                    .send(Event::ContinuationIteration { pty_id, iteration, max })
                    .ok();
            }
            ContinuationEvent::Done { pty_id } => {
                let iterations = self
                    .store
                    .get_continuation_state(&pty_id)
                    .ok()
                    .flatten()
                    .map(|c| c.current_iteration)
                    .unwrap_or(0);
                self.store.delete_continuation_state(&pty_id).ok();
                self.ui_events
                    .send(Event::ContinuationDone { pty_id, iterations })
                    .ok();
            }
            ContinuationEvent::MaxReached { pty_id } => {
                let checkpoint = self.store.get_continuation_state(&pty_id).ok().flatten();
                let (iterations, goal) = checkpoint
                    .map(|c| (c.current_iteration, c.goal))
                    .unwrap_or((self.config.default_max_iterations, String::new()));
                self.store.delete_continuation_state(&pty_id).ok();
                self.ui_events
                    .send(Event::ContinuationMaxReached { pty_id, iterations, goal })
                    .ok();
            }
            ContinuationEvent::Cancelled { pty_id } => {
                self.store.delete_continuation_state(&pty_id).ok();
            }
        }
    }

    fn apply_continue_action(&mut self, pty_id: &str, action: ContinueAction) {
        let payload = match action {
            ContinueAction::Plain => {
                let one_shot = self.sessions.get(pty_id).and_then(|meta| {
                    meta.one_shot_loop
                        .then(|| (meta.one_shot_command.clone(), meta.marker.clone()))
                });
                match one_shot {
                    Some((Some(command), Some(marker))) => format!("{}; echo {}\n", command, marker),
                    _ => "continue\n".to_string(),
                }
            }
            ContinueAction::OneShotCommand(command) => format!("{}\n", command),
        };
        self.pty.write(pty_id, payload.as_bytes());
    }

    // -- workspace.* -------------------------------------------------

    pub fn workspace_open(&mut self, path: &Path) -> Result<(Workspace, Vec<workspace::Skill>, Option<String>)> {
        let workspace = workspace::open(path)?;
        self.store
            .upsert_workspace(&workspace.id, &workspace.path.to_string_lossy(), &workspace.name)?;
        let skills = workspace::scan_skills(&workspace.path);
        let agents_md = workspace::load_agents_md(&workspace.path);
        Ok((workspace, skills, agents_md))
    }

    pub fn workspace_list(&self) -> Result<Vec<Workspace>> {
        self.store.list_workspaces()
    }

    pub fn workspace_active_sessions(&self, workspace_id: &str) -> Result<Vec<AgentSession>> {
        self.store.list_active_sessions(workspace_id)
    }

    // -- shell.* -------------------------------------------------------

    pub fn shell_spawn(
        &mut self,
        cli_type: AgentType,
        workspace_path: &str,
        workspace_id: &str,
        mode: SpawnMode,
    ) -> Result<String> {
        let cwd = std::path::PathBuf::from(workspace_path);
        if !cwd.is_dir() {
            return Err(ForgeError::Validation(format!(
                "{} is not a directory",
                workspace_path
            )));
        }

        let platform = router::current_platform();
        let (spec, one_shot_loop, one_shot_command, goal_for_kickoff) = match &mode {
            SpawnMode::Resume { session_id } => {
                if cli_type != AgentType::Claude || session_id.is_empty() {
                    return Err(ForgeError::Validation(
                        "resume is only supported for claude with a non-empty session id".into(),
                    ));
                }
                let mut base = router::build_spawn_spec(cli_type, workspace_path, platform);
                base.args.push("--resume".to_string());
                base.args.push(session_id.clone());
                (base, false, None, None)
            }
            SpawnMode::OneShotLoop { goal } => {
                if cli_type != AgentType::Claude || goal.is_empty() {
                    return Err(ForgeError::Validation(
                        "one-shot loop is only supported for claude with a non-empty goal".into(),
                    ));
                }
                let spec = router::build_spawn_spec(cli_type, workspace_path, platform);
                let command = router::build_one_shot_command(cli_type, goal, platform);
                (spec, true, Some(command), None)
            }
            SpawnMode::ShellSession => {
                let shell = match platform {
                    router::Platform::Posix => "/bin/sh",
                    router::Platform::Windows => "cmd.exe",
                };
                let spec = router::SpawnSpec {
                    cmd: shell.to_string(),
                    args: Vec::new(),
                    cwd: workspace_path.to_string(),
                };
                (spec, false, None, None)
            }
            SpawnMode::Interactive { goal } => {
                let spec = router::build_spawn_spec(cli_type, workspace_path, platform);
                (spec, false, None, goal.clone())
            }
        };

        let pty_spec = PtySpec {
            cmd: spec.cmd,
            args: spec.args,
            cwd,
            cols: self.config.default_pty_size.0,
            rows: self.config.default_pty_size.1,
            env: std::env::vars().collect(),
        };

        let pty_id = self.pty.spawn(pty_spec)?;

        let agent_session = AgentSession::new(
            pty_id.clone(),
            workspace_id.to_string(),
            cli_type,
            goal_for_kickoff.clone(),
        );
        self.store.create_agent_session(&agent_session)?;

        let marker = one_shot_loop.then(|| generate_marker(&pty_id));

        self.sessions.insert(
            pty_id.clone(),
            SessionMeta {
                workspace_id: workspace_id.to_string(),
                agent_session_id: agent_session.id.clone(),
                one_shot_loop,
                one_shot_command,
                marker,
            },
        );

        if let Some(goal) = goal_for_kickoff {
            self.schedule_goal_kickoff(pty_id.clone(), format!("{}\r", goal).into_bytes());
        }

        Ok(pty_id)
    }

    /// Writes `goal + \r` into the PTY ~1.5s after spawn via the owned
    /// kickoff channel, drained by [`Self::pump_events`]. A kill before the
    /// delay elapses simply makes the eventual write a no-op, since
    /// [`PtyManager::write`] silently drops writes to a gone handle.
    fn schedule_goal_kickoff(&self, pty_id: String, payload: Vec<u8>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let tx = self.goal_kickoffs_tx.clone();
        handle.spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            tx.send((pty_id, payload)).ok();
        });
    }

    pub fn shell_write(&mut self, pty_id: &str, data: &[u8]) {
        self.pty.write(pty_id, data);
    }

    pub fn shell_resize(&mut self, pty_id: &str, cols: u16, rows: u16) -> Result<()> {
        self.pty.resize(pty_id, cols, rows)
    }

    /// Idempotent: removes the handle first, then kills the child, ends
    /// the agent-session row, clears continuation state, stops timers.
    pub fn shell_kill(&mut self, pty_id: &str) {
        self.pty.kill(pty_id);
        self.continuation.stop(pty_id);
        self.store.delete_continuation_state(pty_id).ok();
        if let Some(meta) = self.sessions.remove(pty_id) {
            self.store.end_agent_session(&meta.agent_session_id).ok();
        }
    }

    pub fn shell_is_running(&self, pty_id: &str) -> bool {
        self.pty.is_running(pty_id)
    }

    pub fn shell_read_output(&self, pty_id: &str) -> Option<String> {
        self.pty.read_output(pty_id)
    }

    // -- agent.route -----------------------------------------------------

    pub fn agent_route(&self, goal: &str, preferred: Option<AgentType>) -> router::RouteResult {
        router::route_task(goal, preferred)
    }

    // -- memory.* --------------------------------------------------------

    pub fn memory_store(
        &self,
        workspace_id: &str,
        key: &str,
        content: &str,
        category: MemoryCategory,
    ) -> Result<()> {
        self.store.store_memory(workspace_id, key, content, category)
    }

    pub fn memory_search(&self, workspace_id: &str, query: &str) -> Result<Vec<crate::store::Memory>> {
        self.store.search_memory(workspace_id, query)
    }

    pub fn memory_list(
        &self,
        workspace_id: &str,
        category: Option<MemoryCategory>,
    ) -> Result<Vec<crate::store::Memory>> {
        self.store.list_memories(workspace_id, category)
    }

    pub fn memory_delete(&self, workspace_id: &str, key: &str) -> Result<()> {
        self.store.delete_memory(workspace_id, key)
    }

    // -- continuation.* --------------------------------------------------

    /// `require_prompt` gates whether the engine waits for an idle prompt
    /// before re-engaging (spec.md §4.4 rule 3); callers must opt out
    /// explicitly rather than relying on `StartOptions::default()`, which
    /// is `false`.
    pub fn continuation_start(
        &mut self,
        pty_id: &str,
        goal: &str,
        max_iterations: Option<u32>,
        require_prompt: bool,
    ) {
        let max = self.config.clamp_max_iterations(max_iterations);
        let workspace_id = self
            .sessions
            .get(pty_id)
            .map(|m| m.workspace_id.clone())
            .unwrap_or_default();
        self.continuation.start(
            pty_id,
            &workspace_id,
            goal,
            max,
            StartOptions {
                require_prompt,
                ..Default::default()
            },
        );
        if let Some(state) = self.continuation.state(pty_id) {
            self.store.save_continuation_state(state).ok();
        }
    }

    pub fn continuation_stop(&mut self, pty_id: &str) {
        self.continuation.stop(pty_id);
        self.store.delete_continuation_state(pty_id).ok();
    }

    pub fn continuation_state(&self, pty_id: &str) -> Option<&crate::continuation::ContinuationState> {
        self.continuation.state(pty_id)
    }

    // -- ensemble.synthesis ----------------------------------------------

    pub async fn ensemble_synthesis(
        &mut self,
        job_id: String,
        cli: AgentType,
        workspace_id: &str,
        workspace_path: &str,
        goal: &str,
        n: Option<u32>,
    ) -> Result<crate::synthesis::SynthesisResult> {
        if cli != AgentType::Claude {
            return Err(ForgeError::Validation(
                "synthesis is only supported for claude".into(),
            ));
        }
        let n = self.config.clamp_synthesis_n(n);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let ui_events = self.ui_events.clone();
        let workspace_id = workspace_id.to_string();
        let goal_owned = goal.to_string();

        let forward_task = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                match event {
                    crate::synthesis::SynthesisEvent::Progress {
                        job_id,
                        completed,
                        total,
                    } => {
                        ui_events
                            .send(Event::EnsembleProgress {
                                job_id,
                                workspace_id: workspace_id.clone(),
                                goal: goal_owned.clone(),
                                completed,
                                total,
                            })
                            .ok();
                    }
                    crate::synthesis::SynthesisEvent::Done {
                        job_id,
                        session_id,
                        total,
                    } => {
                        ui_events
                            .send(Event::EnsembleDone {
                                job_id,
                                workspace_id: workspace_id.clone(),
                                goal: goal_owned.clone(),
                                session_id,
                                total,
                            })
                            .ok();
                    }
                }
            }
        });

        let result =
            crate::synthesis::run_synthesis(job_id, cli, Path::new(workspace_path), goal, n, events_tx).await;

        forward_task.abort();
        result
    }
}

/// Strip any line containing `marker` from a raw output chunk before
/// forwarding it to the UI event sink.
fn strip_marker_lines(chunk: &[u8], marker: &str) -> Vec<u8> {
    let text = String::from_utf8_lossy(chunk);
    if !text.contains(marker) {
        return chunk.to_vec();
    }
    text.lines()
        .filter(|line| !line.contains(marker))
        .collect::<Vec<_>>()
        .join("\n")
        .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_lines_containing_marker() {
        let chunk = b"normal output\n__FORGE_DONE_pty-1__\nmore output\n".to_vec();
        let stripped = strip_marker_lines(&chunk, "__FORGE_DONE_pty-1__");
        let text = String::from_utf8(stripped).unwrap();
        assert!(!text.contains("__FORGE_DONE_pty-1__"));
        assert!(text.contains("normal output"));
        assert!(text.contains("more output"));
    }

    #[test]
    fn leaves_chunk_untouched_when_marker_absent() {
        let chunk = b"nothing special here\n".to_vec();
        let stripped = strip_marker_lines(&chunk, "__FORGE_DONE_pty-1__");
        assert_eq!(stripped, chunk);
    }
}
