//! End-to-end scenarios, one test per named case.

use forge_core::agent::AgentType;
use forge_core::config::AppConfig;
use forge_core::continuation::{ContinuationEngine, ContinuationEvent, ContinueAction, StartOptions};
use forge_core::router::route_task;
use forge_core::store::{MemoryCategory, Store};
use forge_core::supervisor::Supervisor;
use forge_core::synthesis::run_synthesis;
use std::io::Write as _;
use std::os::unix::fs::PermissionsExt;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Scenario A: `refactor` (0.9) beats any competing category.
#[test]
fn scenario_a_router_picks_claude_deep_for_refactor() {
    let result = route_task("help me refactor the auth module", None);
    assert_eq!(result.cli, AgentType::Claude);
    assert_eq!(result.category.to_string(), "deep");
    assert!(result.confidence > 0.0);
}

/// Scenario B: `layout`(0.9) + `design`(0.4) outweighs the `design system`
/// pattern when "system" is absent, so the shared term lands on gemini.
#[test]
fn scenario_b_router_picks_gemini_for_shared_design_term() {
    let result = route_task("design the card layout", None);
    assert_eq!(result.cli, AgentType::Gemini);
}

/// A real timer is never awaited: `on_timer_fire` is called directly after
/// each simulated chunk of PTY output, the same way the continuation unit
/// tests drive the cap manually.
fn events_channel() -> (
    ContinuationEngine,
    mpsc::UnboundedReceiver<String>,
    mpsc::UnboundedReceiver<ContinuationEvent>,
) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (engine, fire_rx) = ContinuationEngine::new(events_tx);
    (engine, fire_rx, events_rx)
}

/// Scenario C: happy path to `maxReached` at iteration 3.
#[tokio::test]
async fn scenario_c_continuation_happy_path_reaches_max() {
    let (mut engine, _fire_rx, mut events_rx) = events_channel();
    engine.start(
        "pty-c",
        "w1",
        "x",
        3,
        StartOptions {
            require_prompt: true,
            quiet_delay_ms: Some(250),
            ..Default::default()
        },
    );

    engine.on_output("pty-c", "hello\n❯ ");
    assert!(matches!(engine.on_timer_fire("pty-c"), Some(ContinueAction::Plain)));
    assert!(matches!(
        events_rx.try_recv().unwrap(),
        ContinuationEvent::Iteration { iteration: 1, .. }
    ));

    engine.on_output("pty-c", "still working…");
    assert!(engine.on_timer_fire("pty-c").is_none());
    engine.on_output("pty-c", "❯ ");
    assert!(matches!(engine.on_timer_fire("pty-c"), Some(ContinueAction::Plain)));
    assert!(matches!(
        events_rx.try_recv().unwrap(),
        ContinuationEvent::Iteration { iteration: 2, .. }
    ));

    engine.on_output("pty-c", "more work…");
    assert!(engine.on_timer_fire("pty-c").is_none());
    engine.on_output("pty-c", "❯ ");
    assert!(matches!(engine.on_timer_fire("pty-c"), Some(ContinueAction::Plain)));
    assert!(matches!(
        events_rx.try_recv().unwrap(),
        ContinuationEvent::Iteration { iteration: 3, .. }
    ));

    assert!(engine.on_timer_fire("pty-c").is_none());
    assert!(matches!(
        events_rx.try_recv().unwrap(),
        ContinuationEvent::MaxReached { .. }
    ));
    assert!(!engine.is_running("pty-c"));
}

/// Scenario D: a completion marker on the second reply ends the loop at
/// iteration 1, with no further iterations emitted.
#[tokio::test]
async fn scenario_d_continuation_completes_on_marker() {
    let (mut engine, _fire_rx, mut events_rx) = events_channel();
    engine.start(
        "pty-d",
        "w1",
        "x",
        3,
        StartOptions {
            require_prompt: true,
            quiet_delay_ms: Some(250),
            ..Default::default()
        },
    );

    engine.on_output("pty-d", "hello\n❯ ");
    assert!(matches!(engine.on_timer_fire("pty-d"), Some(ContinueAction::Plain)));
    assert!(matches!(
        events_rx.try_recv().unwrap(),
        ContinuationEvent::Iteration { iteration: 1, .. }
    ));

    engine.on_output("pty-d", "all tasks completed\n");
    assert!(engine.on_timer_fire("pty-d").is_none());
    assert!(matches!(events_rx.try_recv().unwrap(), ContinuationEvent::Done { .. }));
    assert!(events_rx.try_recv().is_err(), "no iteration should follow done");
    assert!(!engine.is_running("pty-d"));
}

/// `Supervisor::continuation_start` is the only place in the crate that
/// builds `StartOptions`; this pins its `require_prompt` wiring so the
/// default can't silently regress to `StartOptions::default()` again.
#[test]
fn supervisor_continuation_start_wires_require_prompt() {
    let store = Store::open_in_memory().unwrap();
    let (mut supervisor, _ui_events) = Supervisor::new(store, AppConfig::default());

    supervisor.continuation_start("pty-x", "goal", None, true);
    assert!(supervisor.continuation_state("pty-x").unwrap().require_prompt);

    supervisor.continuation_start("pty-y", "goal", None, false);
    assert!(!supervisor.continuation_state("pty-y").unwrap().require_prompt);
}

/// Scenario E: an unbalanced quote is invalid FTS5 syntax; the store falls
/// back to a `LIKE` scan instead of surfacing the error.
#[test]
fn scenario_e_memory_search_falls_back_on_unbalanced_quote() {
    let store = Store::open_in_memory().unwrap();
    store
        .store_memory("w1", "k1", "hello world", MemoryCategory::Core)
        .unwrap();
    let results = store.search_memory("w1", "hel lo\"").unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].key, "k1");
}

/// Guards the fake `claude` PATH entry scenario F installs: tests run in
/// one process, so mutating `PATH` must be serialized against any other
/// test in this file that might do the same.
static PATH_GUARD: Mutex<()> = Mutex::new(());

fn install_fake_claude() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let script_path = dir.path().join("claude");
    let mut file = std::fs::File::create(&script_path).unwrap();
    writeln!(file, "#!/bin/sh").unwrap();
    writeln!(file, "cat >/dev/null").unwrap();
    writeln!(file, "echo ok").unwrap();
    drop(file);
    let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script_path, perms).unwrap();
    dir
}

/// Scenario F: n=2 synthesis runs plus a hidden final run, with exactly
/// three progress events (`0,1,2`) and one `done`, and no leftover
/// isolated-home directories once the job finishes.
#[tokio::test]
async fn scenario_f_synthesis_end_to_end_with_two_runs() {
    let _guard = PATH_GUARD.lock().unwrap();
    let fake_bin = install_fake_claude();
    let original_path = std::env::var("PATH").unwrap_or_default();
    std::env::set_var(
        "PATH",
        format!("{}:{}", fake_bin.path().display(), original_path),
    );

    let workspace = tempfile::tempdir().unwrap();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let result = run_synthesis(
        "job-f".to_string(),
        AgentType::Claude,
        workspace.path(),
        "do the thing",
        2,
        events_tx,
    )
    .await;

    std::env::set_var("PATH", original_path);

    let result = result.unwrap();
    assert_eq!(result.count, 2);
    assert_eq!(result.job_id, "job-f");
    assert!(!result.session_id.is_empty());

    let mut progress = Vec::new();
    let mut saw_done = false;
    while let Ok(event) = events_rx.try_recv() {
        match event {
            forge_core::synthesis::SynthesisEvent::Progress { completed, total, .. } => {
                assert_eq!(total, 2);
                progress.push(completed);
            }
            forge_core::synthesis::SynthesisEvent::Done { total, session_id, .. } => {
                assert_eq!(total, 2);
                assert_eq!(session_id, result.session_id);
                saw_done = true;
            }
        }
    }
    assert_eq!(progress, vec![0, 1, 2]);
    assert!(saw_done);

    // Isolated-home directories are scoped to `run_isolated` by a
    // `tempfile::TempDir` whose `Drop` removes it; nothing in this crate
    // holds one open past that call, so by the time `run_synthesis`
    // returns there is nothing left to clean up.
}
