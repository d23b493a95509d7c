//! PTY process management: spawn a child attached to a pseudoterminal,
//! stream its output, accept writes/resizes, and kill it.
//!
//! A non-blocking `dup`'d-fd reader on Unix plus a ring buffer for late
//! attach let output be pushed as an async event stream instead of pulled
//! by a polling UI loop. Environment is filtered through an allow-list
//! before the child ever sees it.

pub mod buffer;

use crate::{ForgeError, Result};
use buffer::RingBuffer;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const OUTPUT_BUFFER_CAPACITY: usize = 50_000;
const READ_POLL_INTERVAL_MS: u64 = 15;

/// Environment variables forwarded to a spawned child, before `TERM`,
/// `COLORTERM`, and `LANG` are forced/defaulted.
const ENV_ALLOW_LIST: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LOGNAME",
    "SHELL",
    "LANG",
    "TERM",
    "COLORTERM",
    "DISPLAY",
    "WAYLAND_DISPLAY",
    "SYSTEMROOT",
    "SYSTEMDRIVE",
    "WINDIR",
    "APPDATA",
    "LOCALAPPDATA",
    "COMMONPROGRAMFILES",
    "TEMP",
    "TMP",
    "USERPROFILE",
    "HOMEDRIVE",
    "HOMEPATH",
    "NUMBER_OF_PROCESSORS",
    "PROCESSOR_ARCHITECTURE",
    "OS",
    "COMSPEC",
    "PSModulePath",
];

/// Filter `env` down to the allow-list (plus `LC_*`, `XDG_*`, `WSL*`, and
/// `PROGRAMFILES*` prefixes), then force `TERM`/`COLORTERM` and default `LANG`.
pub fn sanitize_env(env: &HashMap<String, String>) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for (key, value) in env {
        let allowed = ENV_ALLOW_LIST.contains(&key.as_str())
            || key.starts_with("LC_")
            || key.starts_with("XDG_")
            || key.starts_with("WSL")
            || key.starts_with("PROGRAMFILES");
        if allowed {
            out.insert(key.clone(), value.clone());
        }
    }
    out.insert("TERM".to_string(), "xterm-256color".to_string());
    out.insert("COLORTERM".to_string(), "truecolor".to_string());
    out.entry("LANG".to_string())
        .or_insert_with(|| "en_US.UTF-8".to_string());
    out
}

fn generate_pty_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis();
    let suffix: u16 = rand::random();
    format!("pty-{:x}-{:04x}", millis, suffix)
}

/// Spec for spawning a new PTY-attached child.
#[derive(Debug, Clone)]
pub struct PtySpec {
    pub cmd: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub cols: u16,
    pub rows: u16,
    pub env: HashMap<String, String>,
}

impl Default for PtySpec {
    fn default() -> Self {
        Self {
            cmd: String::new(),
            args: Vec::new(),
            cwd: PathBuf::from("."),
            cols: 120,
            rows: 30,
            env: HashMap::new(),
        }
    }
}

/// Events the manager emits for a live session.
#[derive(Debug, Clone)]
pub enum PtyEvent {
    Data { pty_id: String, chunk: Vec<u8> },
    Exit { pty_id: String, code: i32 },
}

type SharedChild = Arc<Mutex<Box<dyn Child + Send + Sync>>>;

struct Handle {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: SharedChild,
    buffer: Arc<Mutex<RingBuffer>>,
    reader_task: tokio::task::JoinHandle<()>,
}

/// Owns every live PTY session, keyed by `ptyId`.
pub struct PtyManager {
    handles: HashMap<String, Handle>,
    events: mpsc::UnboundedSender<PtyEvent>,
}

impl PtyManager {
    pub fn new(events: mpsc::UnboundedSender<PtyEvent>) -> Self {
        Self {
            handles: HashMap::new(),
            events,
        }
    }

    /// Spawn a child attached to a fresh pseudoterminal. Returns the new
    /// `ptyId`.
    pub fn spawn(&mut self, spec: PtySpec) -> Result<String> {
        let pty_system = native_pty_system();
        let size = PtySize {
            rows: spec.rows,
            cols: spec.cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        let pair = pty_system
            .openpty(size)
            .map_err(|e| ForgeError::Pty(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&spec.cmd);
        cmd.args(&spec.args);
        cmd.cwd(&spec.cwd);
        cmd.env_clear();
        for (key, value) in sanitize_env(&spec.env) {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| ForgeError::Pty(e.to_string()))?;
        drop(pair.slave);

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| ForgeError::Pty(e.to_string()))?;

        let pty_id = generate_pty_id();
        let buffer = Arc::new(Mutex::new(RingBuffer::new(OUTPUT_BUFFER_CAPACITY)));
        let child: SharedChild = Arc::new(Mutex::new(child));

        let reader: Box<dyn Read + Send> = open_dup_reader(&pair.master)?;

        let reader_task = spawn_reader_task(
            pty_id.clone(),
            reader,
            buffer.clone(),
            child.clone(),
            self.events.clone(),
        );

        self.handles.insert(
            pty_id.clone(),
            Handle {
                master: pair.master,
                writer,
                child,
                buffer,
                reader_task,
            },
        );

        Ok(pty_id)
    }

    /// Best-effort write; silently drops if the handle is gone.
    pub fn write(&mut self, pty_id: &str, data: &[u8]) {
        if let Some(handle) = self.handles.get_mut(pty_id) {
            let _ = handle.writer.write_all(data);
            let _ = handle.writer.flush();
        }
    }

    /// Resize the PTY, rejecting out-of-range dimensions.
    pub fn resize(&mut self, pty_id: &str, cols: u16, rows: u16) -> Result<()> {
        if !(1..=500).contains(&cols) || !(1..=200).contains(&rows) {
            return Err(ForgeError::Validation(format!(
                "pty size {}x{} out of range",
                cols, rows
            )));
        }
        let handle = self
            .handles
            .get(pty_id)
            .ok_or_else(|| ForgeError::SessionNotFound(pty_id.to_string()))?;
        handle
            .master
            .resize(PtySize {
                cols,
                rows,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ForgeError::Pty(e.to_string()))
    }

    /// Idempotent: removes the handle first, then terminates the child. A
    /// second call is a no-op.
    pub fn kill(&mut self, pty_id: &str) {
        if let Some(handle) = self.handles.remove(pty_id) {
            handle.reader_task.abort();
            if let Ok(mut child) = handle.child.lock() {
                let _ = child.kill();
            }
        }
    }

    pub fn is_running(&self, pty_id: &str) -> bool {
        self.handles.contains_key(pty_id)
    }

    /// Snapshot of the buffered output for late attach, ANSI stripped.
    pub fn read_output(&self, pty_id: &str) -> Option<String> {
        let handle = self.handles.get(pty_id)?;
        let guard = handle.buffer.lock().ok()?;
        let raw = guard.read_all();
        let stripped = strip_ansi_escapes::strip(&raw);
        Some(String::from_utf8_lossy(&stripped).to_string())
    }
}

#[cfg(unix)]
fn open_dup_reader(master: &Box<dyn MasterPty + Send>) -> Result<Box<dyn Read + Send>> {
    use std::os::unix::io::FromRawFd;
    if let Some(master_fd) = master.as_raw_fd() {
        let fd = unsafe { libc::dup(master_fd) };
        if fd >= 0 {
            unsafe {
                let flags = libc::fcntl(fd, libc::F_GETFL);
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
            }
            let file = unsafe { std::fs::File::from_raw_fd(fd) };
            return Ok(Box::new(file));
        }
    }
    master
        .try_clone_reader()
        .map_err(|e| ForgeError::Pty(e.to_string()))
}

#[cfg(not(unix))]
fn open_dup_reader(master: &Box<dyn MasterPty + Send>) -> Result<Box<dyn Read + Send>> {
    master
        .try_clone_reader()
        .map_err(|e| ForgeError::Pty(e.to_string()))
}

fn spawn_reader_task(
    pty_id: String,
    mut reader: Box<dyn Read + Send>,
    buffer: Arc<Mutex<RingBuffer>>,
    child: SharedChild,
    events: mpsc::UnboundedSender<PtyEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    let data = &chunk[..n];
                    if let Ok(mut guard) = buffer.lock() {
                        guard.write(data);
                    }
                    let _ = events.send(PtyEvent::Data {
                        pty_id: pty_id.clone(),
                        chunk: data.to_vec(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(READ_POLL_INTERVAL_MS));
                }
                Err(_) => break,
            }
        }

        let code = match child.lock() {
            Ok(mut child) => match child.wait() {
                Ok(status) => status.exit_code() as i32,
                Err(_) => -1,
            },
            Err(_) => -1,
        };
        let _ = events.send(PtyEvent::Exit { pty_id, code });
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_env_drops_unlisted_vars() {
        let mut input = HashMap::new();
        input.insert("PATH".to_string(), "/usr/bin".to_string());
        input.insert("SECRET_TOKEN".to_string(), "sekrit".to_string());
        input.insert("LC_ALL".to_string(), "en_US.UTF-8".to_string());

        let sanitized = sanitize_env(&input);
        assert_eq!(sanitized.get("PATH").unwrap(), "/usr/bin");
        assert_eq!(sanitized.get("LC_ALL").unwrap(), "en_US.UTF-8");
        assert!(!sanitized.contains_key("SECRET_TOKEN"));
    }

    #[test]
    fn sanitize_env_forces_term_and_colorterm() {
        let mut input = HashMap::new();
        input.insert("TERM".to_string(), "dumb".to_string());
        let sanitized = sanitize_env(&input);
        assert_eq!(sanitized.get("TERM").unwrap(), "xterm-256color");
        assert_eq!(sanitized.get("COLORTERM").unwrap(), "truecolor");
    }

    #[test]
    fn sanitize_env_defaults_lang_only_when_absent() {
        let mut input = HashMap::new();
        input.insert("LANG".to_string(), "fr_FR.UTF-8".to_string());
        let sanitized = sanitize_env(&input);
        assert_eq!(sanitized.get("LANG").unwrap(), "fr_FR.UTF-8");

        let sanitized_default = sanitize_env(&HashMap::new());
        assert_eq!(sanitized_default.get("LANG").unwrap(), "en_US.UTF-8");
    }

    #[test]
    fn pty_ids_are_unique() {
        let a = generate_pty_id();
        let b = generate_pty_id();
        assert_ne!(a, b);
        assert!(a.starts_with("pty-"));
    }
}
