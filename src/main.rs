use anyhow::{Context, Result};
use clap::Parser;
use forge_core::agent::AgentType;
use forge_core::cli::{
    AgentCommands, Cli, Commands, ContinuationCommands, EnsembleCommands, MemoryCommands, ShellCommands,
    WorkspaceCommands,
};
use forge_core::config::AppConfig;
use forge_core::ipc::Event;
use forge_core::store::{MemoryCategory, Store};
use forge_core::supervisor::{SpawnMode, Supervisor};
use forge_core::workspace;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;

fn db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("forge")
        .join("forge.db")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("forge_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let store = Store::open(db_path()).context("opening store")?;
    let (mut supervisor, mut ui_events) = Supervisor::new(store, AppConfig::default());

    match cli.command {
        Commands::Workspace { command } => handle_workspace(&mut supervisor, command)?,
        Commands::Shell { command } => handle_shell(&mut supervisor, &mut ui_events, command).await?,
        Commands::Agent { command } => handle_agent(&supervisor, command)?,
        Commands::Memory { command } => handle_memory(&supervisor, command)?,
        Commands::Continuation { command } => handle_continuation(&mut supervisor, command),
        Commands::Ensemble { command } => handle_ensemble(&mut supervisor, &mut ui_events, command).await?,
    }

    Ok(())
}

fn handle_workspace(supervisor: &mut Supervisor, command: WorkspaceCommands) -> Result<()> {
    match command {
        WorkspaceCommands::Open { path } => {
            let (workspace, skills, agents_md) = supervisor.workspace_open(&path)?;
            println!("workspace {} ({})", workspace.id, workspace.path.display());
            println!("  {} skill(s) discovered", skills.len());
            for skill in &skills {
                println!("    {} - {}", skill.name, skill.description);
            }
            if let Some(contents) = agents_md {
                println!("  AGENTS.md loaded ({} bytes)", contents.len());
            }
        }
        WorkspaceCommands::List => {
            for ws in supervisor.workspace_list()? {
                println!("{}  {}  {}", ws.id, ws.name, ws.path.display());
            }
        }
        WorkspaceCommands::Skills { workspace_path } => {
            for skill in workspace::scan_skills(&workspace_path) {
                println!("{} - {} ({})", skill.name, skill.description, skill.path.display());
            }
        }
        WorkspaceCommands::AgentsMd { workspace_path } => match workspace::load_agents_md(&workspace_path) {
            Some(contents) => println!("{}", contents),
            None => println!("(none found)"),
        },
        WorkspaceCommands::Sessions { workspace_id } => {
            for session in supervisor.workspace_active_sessions(&workspace_id)? {
                println!(
                    "{}  {}  iter={}  goal={:?}",
                    session.id, session.cli_type, session.iteration_count, session.goal
                );
            }
        }
    }
    Ok(())
}

async fn handle_shell(
    supervisor: &mut Supervisor,
    ui_events: &mut UnboundedReceiver<Event>,
    command: ShellCommands,
) -> Result<()> {
    match command {
        ShellCommands::Spawn {
            cli,
            workspace_path,
            goal,
            one_shot_loop,
            shell_session,
            resume,
            no_attach,
        } => {
            let cli_type = AgentType::parse(&cli)?;
            let workspace_id = workspace::workspace_id(&workspace_path)?;
            let mode = if let Some(session_id) = resume {
                SpawnMode::Resume { session_id }
            } else if one_shot_loop {
                let goal = goal.clone().context("--one-shot-loop requires --goal")?;
                SpawnMode::OneShotLoop { goal }
            } else if shell_session {
                SpawnMode::ShellSession
            } else {
                SpawnMode::Interactive { goal: goal.clone() }
            };

            let pty_id = supervisor.shell_spawn(cli_type, &workspace_path.to_string_lossy(), &workspace_id, mode)?;
            println!("spawned {}", pty_id);
            if !no_attach {
                attach_loop(supervisor, ui_events, &pty_id).await?;
            }
        }
        ShellCommands::Write { pty_id, data } => supervisor.shell_write(&pty_id, data.as_bytes()),
        ShellCommands::Resize { pty_id, cols, rows } => supervisor.shell_resize(&pty_id, cols, rows)?,
        ShellCommands::Kill { pty_id } => supervisor.shell_kill(&pty_id),
    }
    Ok(())
}

/// Forward stdin lines to the PTY and PTY output to stdout until the
/// session exits or stdin closes. No raw-mode keystroke forwarding here:
/// this binary is a thin, scriptable binding onto the Supervisor, not a
/// terminal emulator.
async fn attach_loop(supervisor: &mut Supervisor, ui_events: &mut UnboundedReceiver<Event>, pty_id: &str) -> Result<()> {
    use std::io::Write;

    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(50));

    println!("--- attached to {} (Ctrl+D to detach) ---", pty_id);
    loop {
        supervisor.pump_events();
        tokio::select! {
            _ = ticker.tick() => {}
            maybe_event = ui_events.recv() => {
                match maybe_event {
                    Some(Event::ShellData { pty_id: id, chunk }) if id == pty_id => {
                        std::io::stdout().write_all(&chunk)?;
                        std::io::stdout().flush()?;
                    }
                    Some(Event::ShellExit { pty_id: id, code }) if id == pty_id => {
                        println!("\n--- session exited with code {} ---", code);
                        break;
                    }
                    Some(_) => {}
                    None => break,
                }
            }
            maybe_line = stdin_lines.next_line() => {
                match maybe_line? {
                    Some(line) => {
                        let mut data = line.into_bytes();
                        data.push(b'\n');
                        supervisor.shell_write(pty_id, &data);
                    }
                    None => break,
                }
            }
        }
        if !supervisor.shell_is_running(pty_id) {
            break;
        }
    }
    Ok(())
}

fn handle_agent(supervisor: &Supervisor, command: AgentCommands) -> Result<()> {
    match command {
        AgentCommands::Route { goal, preferred } => {
            let preferred = preferred.map(|p| AgentType::parse(&p)).transpose()?;
            let result = supervisor.agent_route(&goal, preferred);
            println!(
                "{} ({}) confidence={:.2} - {}",
                result.cli, result.category, result.confidence, result.rationale
            );
        }
    }
    Ok(())
}

fn handle_memory(supervisor: &Supervisor, command: MemoryCommands) -> Result<()> {
    match command {
        MemoryCommands::Store {
            workspace_id,
            key,
            content,
            category,
        } => {
            let category = category.as_deref().map(str::parse).transpose()?.unwrap_or_default();
            supervisor.memory_store(&workspace_id, &key, &content, category)?;
            println!("stored {}", key);
        }
        MemoryCommands::Search { workspace_id, query } => {
            for memory in supervisor.memory_search(&workspace_id, &query)? {
                println!("{}: {}", memory.key, memory.content);
            }
        }
        MemoryCommands::List { workspace_id, category } => {
            let category: Option<MemoryCategory> = category.as_deref().map(str::parse).transpose()?;
            for memory in supervisor.memory_list(&workspace_id, category)? {
                println!("[{}] {}: {}", memory.category, memory.key, memory.content);
            }
        }
        MemoryCommands::Delete { workspace_id, key } => {
            supervisor.memory_delete(&workspace_id, &key)?;
            println!("deleted {}", key);
        }
    }
    Ok(())
}

fn handle_continuation(supervisor: &mut Supervisor, command: ContinuationCommands) {
    match command {
        ContinuationCommands::Start {
            pty_id,
            goal,
            max_iterations,
            no_require_prompt,
        } => {
            supervisor.continuation_start(&pty_id, &goal, max_iterations, !no_require_prompt);
            println!("continuation started for {}", pty_id);
        }
        ContinuationCommands::Stop { pty_id } => {
            supervisor.continuation_stop(&pty_id);
            println!("continuation stopped for {}", pty_id);
        }
        ContinuationCommands::State { pty_id } => match supervisor.continuation_state(&pty_id) {
            Some(state) => println!(
                "{}/{} iterations, status {:?}",
                state.current_iteration, state.max_iterations, state.status
            ),
            None => println!("(no active continuation)"),
        },
    }
}

async fn handle_ensemble(
    supervisor: &mut Supervisor,
    ui_events: &mut UnboundedReceiver<Event>,
    command: EnsembleCommands,
) -> Result<()> {
    match command {
        EnsembleCommands::Synthesis {
            cli,
            workspace_path,
            goal,
            n,
        } => {
            let cli_type = AgentType::parse(&cli)?;
            let workspace_id = workspace::workspace_id(&workspace_path)?;
            let job_id = uuid::Uuid::new_v4().to_string();
            let result = supervisor
                .ensemble_synthesis(
                    job_id,
                    cli_type,
                    &workspace_id,
                    &workspace_path.to_string_lossy(),
                    &goal,
                    n,
                )
                .await?;

            while let Ok(event) = ui_events.try_recv() {
                if let Event::EnsembleProgress { completed, total, .. } = event {
                    println!("progress {}/{}", completed, total);
                }
            }
            println!(
                "synthesis complete: {} runs, session {}",
                result.count, result.session_id
            );
        }
    }
    Ok(())
}
