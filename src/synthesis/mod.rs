//! Best-of-N synthesis: N isolated, non-interactive runs of one CLI raced
//! in parallel, combined into a single synthesis prompt, and resolved by
//! one final hidden run bound to a fresh session id. This is N runs of
//! exactly one CLI, not a race between different assistants judged by a
//! scoring strategy.

use crate::agent::AgentType;
use crate::{ForgeError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc;

const RUN_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Progress/completion events for one synthesis job.
#[derive(Debug, Clone)]
pub enum SynthesisEvent {
    Progress {
        job_id: String,
        completed: u32,
        total: u32,
    },
    Done {
        job_id: String,
        session_id: String,
        total: u32,
    },
}

/// Outcome handed back to the caller once a job finishes.
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    pub count: u32,
    pub session_id: String,
    pub job_id: String,
}

/// Known locations `~/.claude.json` backups live in, newest-first restore
/// candidate search.
fn claude_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".claude.json"))
}

fn claude_backup_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".claude").join("backups"))
}

/// If `~/.claude.json` exists and fails to parse as JSON, restore the
/// newest backup file that does parse. Best-effort: a missing config or an
/// unreadable backup directory is not an error.
pub async fn repair_corrupted_config() -> Result<()> {
    let Some(config_path) = claude_config_path() else {
        return Ok(());
    };
    let contents = match tokio::fs::read_to_string(&config_path).await {
        Ok(c) => c,
        Err(_) => return Ok(()),
    };
    if serde_json::from_str::<serde_json::Value>(&contents).is_ok() {
        return Ok(());
    }

    let Some(backup_dir) = claude_backup_dir() else {
        return Ok(());
    };
    let Ok(mut entries) = tokio::fs::read_dir(&backup_dir).await else {
        return Ok(());
    };

    let mut candidates: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        if let Ok(text) = tokio::fs::read_to_string(&path).await {
            if serde_json::from_str::<serde_json::Value>(&text).is_ok() {
                candidates.push((modified, path));
            }
        }
    }

    candidates.sort_by_key(|(modified, _)| *modified);
    if let Some((_, newest)) = candidates.pop() {
        if let Ok(text) = tokio::fs::read_to_string(&newest).await {
            let _ = tokio::fs::write(&config_path, text).await;
        }
    }
    Ok(())
}

/// A fresh, disposable `$HOME` for one isolated run.
struct IsolatedHome {
    _dir: tempfile::TempDir,
    home_path: PathBuf,
}

async fn build_isolated_home() -> Result<IsolatedHome> {
    let dir = tempfile::TempDir::new().map_err(ForgeError::Io)?;
    let home_path = dir.path().join("home");
    tokio::fs::create_dir_all(&home_path).await?;

    if cfg!(windows) {
        tokio::fs::create_dir_all(home_path.join("AppData/Roaming")).await?;
        tokio::fs::create_dir_all(home_path.join("AppData/Local")).await?;
    }

    if let Some(real_home) = dirs::home_dir() {
        let copies: &[(PathBuf, PathBuf)] = &[
            (real_home.join(".claude.json"), home_path.join(".claude.json")),
            (
                real_home.join(".claude/.credentials.json"),
                home_path.join(".claude/.credentials.json"),
            ),
            (
                real_home.join(".claude/settings.json"),
                home_path.join(".claude/settings.json"),
            ),
            (
                real_home.join(".claude/settings.local.json"),
                home_path.join(".claude/settings.local.json"),
            ),
            (
                real_home.join(".claude/CLAUDE.md"),
                home_path.join(".claude/CLAUDE.md"),
            ),
        ];
        for (src, dst) in copies {
            if src.exists() {
                if let Some(parent) = dst.parent() {
                    let _ = tokio::fs::create_dir_all(parent).await;
                }
                let _ = tokio::fs::copy(src, dst).await;
            }
        }
    }

    Ok(IsolatedHome {
        _dir: dir,
        home_path,
    })
}

fn env_for_isolated_home(home: &Path) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars().collect();
    env.insert("HOME".to_string(), home.to_string_lossy().to_string());
    if cfg!(windows) {
        env.insert("USERPROFILE".to_string(), home.to_string_lossy().to_string());
        env.insert(
            "HOMEDRIVE".to_string(),
            home.components().next().map(|c| c.as_os_str().to_string_lossy().to_string()).unwrap_or_default(),
        );
        env.insert("HOMEPATH".to_string(), home.to_string_lossy().to_string());
        env.insert(
            "APPDATA".to_string(),
            home.join("AppData/Roaming").to_string_lossy().to_string(),
        );
        env.insert(
            "LOCALAPPDATA".to_string(),
            home.join("AppData/Local").to_string_lossy().to_string(),
        );
    }
    env
}

/// Lines the post-processing filter strips, and the blank-run collapse it
/// applies, regardless of which run produced the config warning.
const CONFIG_WARNING_SNIPPETS: &[&str] = &[
    "Warning: Could not parse",
    "config file appears corrupted",
    "Falling back to default configuration",
];

fn filter_output(raw: &str) -> String {
    let without_warnings: Vec<&str> = raw
        .lines()
        .filter(|line| !CONFIG_WARNING_SNIPPETS.iter().any(|snippet| line.contains(snippet)))
        .collect();
    let joined = without_warnings.join("\n");

    let mut collapsed = String::with_capacity(joined.len());
    let mut blank_run = 0;
    for line in joined.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run <= 2 {
                collapsed.push('\n');
            }
        } else {
            blank_run = 0;
            collapsed.push_str(line);
            collapsed.push('\n');
        }
    }
    collapsed
}

/// Run one non-interactive child, piping `stdin_payload` to it and
/// returning its filtered stdout+stderr.
async fn run_isolated(cli: AgentType, args: &[&str], stdin_payload: &str, cwd: &Path) -> String {
    let home = match build_isolated_home().await {
        Ok(home) => home,
        Err(e) => return format!("(runner error: {})", e),
    };
    let env = env_for_isolated_home(&home.home_path);

    let mut command = Command::new(cli.command());
    command
        .args(args)
        .current_dir(cwd)
        .env_clear()
        .envs(&env)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => return format!("(runner error: {})", e),
    };

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(stdin_payload.as_bytes()).await;
    }

    let output = tokio::time::timeout(RUN_TIMEOUT, child.wait_with_output()).await;
    match output {
        Ok(Ok(output)) => {
            let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            if output.status.success() {
                filter_output(&combined)
            } else {
                format!(
                    "(exit code {})",
                    output.status.code().unwrap_or(-1)
                )
            }
        }
        Ok(Err(e)) => format!("(runner error: {})", e),
        Err(_) => "(timed out)".to_string(),
    }
}

/// Run a full synthesis job: `n` isolated runs of `cli` plus one hidden
/// final synthesis run, reporting progress over `events`.
pub async fn run_synthesis(
    job_id: String,
    cli: AgentType,
    workspace_path: &Path,
    goal: &str,
    n: u32,
    events: mpsc::UnboundedSender<SynthesisEvent>,
) -> Result<SynthesisResult> {
    let n = n.clamp(1, 12);
    events
        .send(SynthesisEvent::Progress {
            job_id: job_id.clone(),
            completed: 0,
            total: n,
        })
        .ok();

    repair_corrupted_config().await?;

    let mut results = vec![String::new(); n as usize];
    let mut completed = 0u32;

    let mut tasks = tokio::task::JoinSet::new();
    for index in 0..n {
        let goal = goal.to_string();
        let workspace_path = workspace_path.to_path_buf();
        tasks.spawn(async move {
            let text = run_isolated(
                cli,
                &["-p", "--no-session-persistence"],
                &goal,
                &workspace_path,
            )
            .await;
            (index, text)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Ok((index, text)) = joined {
            results[index as usize] = text;
            completed += 1;
            events
                .send(SynthesisEvent::Progress {
                    job_id: job_id.clone(),
                    completed,
                    total: n,
                })
                .ok();
        }
    }

    let combined = results
        .iter()
        .enumerate()
        .map(|(i, text)| format!("=== Claude {}/{} ===\n{}", i + 1, n, text))
        .collect::<Vec<_>>()
        .join("\n\n");

    let synthesis_prompt = format!(
        "You are a world-class synthesizer. Here are {} independent answers to the same task.\n{}\n\nProduce one final, concise, high-quality answer that combines their best ideas.",
        n, combined
    );

    let session_id = uuid::Uuid::new_v4().to_string();
    let session_id_arg = session_id.clone();
    let final_output = run_isolated(
        cli,
        &["-p", "--session-id", &session_id_arg],
        &synthesis_prompt,
        workspace_path,
    )
    .await;

    if final_output.starts_with("(runner error:") {
        return Err(ForgeError::Synthesis(final_output));
    }

    events
        .send(SynthesisEvent::Done {
            job_id: job_id.clone(),
            session_id: session_id.clone(),
            total: n,
        })
        .ok();

    Ok(SynthesisResult {
        count: n,
        session_id,
        job_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_strips_config_warnings() {
        let raw = "line one\nWarning: Could not parse config\nline two\n";
        let filtered = filter_output(raw);
        assert!(!filtered.contains("Warning: Could not parse"));
        assert!(filtered.contains("line one"));
        assert!(filtered.contains("line two"));
    }

    #[test]
    fn filter_collapses_long_blank_runs() {
        let raw = "a\n\n\n\n\nb\n";
        let filtered = filter_output(raw);
        let blank_lines = filtered.lines().filter(|l| l.trim().is_empty()).count();
        assert_eq!(blank_lines, 2);
    }

    #[tokio::test]
    async fn repair_is_a_noop_when_config_file_is_absent() {
        // Exercised against whatever home the test runner has; must never
        // error even if `~/.claude.json` does not exist.
        assert!(repair_corrupted_config().await.is_ok());
    }
}
