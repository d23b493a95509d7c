//! Embedded durable store: workspaces, agent sessions, memories with BM25
//! full-text search, and continuation-state checkpoints.

use crate::agent::{AgentSession, AgentSessionStatus, AgentType};
use crate::continuation::{ContinuationState, ContinuationStatus};
use crate::workspace::Workspace;
use crate::{ForgeError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

/// Category tag on a [`Memory`] row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryCategory {
    Core,
    Daily,
    Conversation,
}

impl MemoryCategory {
    fn as_str(self) -> &'static str {
        match self {
            MemoryCategory::Core => "core",
            MemoryCategory::Daily => "daily",
            MemoryCategory::Conversation => "conversation",
        }
    }

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "core" => Ok(MemoryCategory::Core),
            "daily" => Ok(MemoryCategory::Daily),
            "conversation" => Ok(MemoryCategory::Conversation),
            other => Err(ForgeError::Database(rusqlite::Error::InvalidColumnType(
                0,
                format!("unknown memory category '{}'", other),
                rusqlite::types::Type::Text,
            ))),
        }
    }
}

impl Default for MemoryCategory {
    fn default() -> Self {
        MemoryCategory::Core
    }
}

impl std::str::FromStr for MemoryCategory {
    type Err = ForgeError;

    fn from_str(value: &str) -> Result<Self> {
        MemoryCategory::from_str(value)
    }
}

impl std::fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A durable key/value memory row, scoped to one workspace.
#[derive(Debug, Clone)]
pub struct Memory {
    pub id: i64,
    pub workspace_id: String,
    pub key: String,
    pub content: String,
    pub category: MemoryCategory,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// SQLite-backed embedded store, one connection per process.
pub struct Store {
    db_path: PathBuf,
    conn: Connection,
}

impl Store {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&db_path)?;
        let mut store = Self { db_path, conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self {
            db_path: PathBuf::from(":memory:"),
            conn,
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn init_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA cache_size = -8000;

            CREATE TABLE IF NOT EXISTS workspaces (
              id TEXT PRIMARY KEY,
              path TEXT NOT NULL UNIQUE,
              name TEXT NOT NULL,
              last_opened TEXT NOT NULL,
              pinned INTEGER NOT NULL DEFAULT 0,
              config TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS agent_sessions (
              id TEXT PRIMARY KEY,
              workspace_id TEXT NOT NULL,
              cli_type TEXT NOT NULL,
              goal TEXT,
              status TEXT NOT NULL,
              iteration_count INTEGER NOT NULL DEFAULT 0,
              token_input INTEGER NOT NULL DEFAULT 0,
              token_output INTEGER NOT NULL DEFAULT 0,
              started_at TEXT NOT NULL,
              ended_at TEXT
            );

            CREATE TABLE IF NOT EXISTS workspace_memories (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              workspace_id TEXT NOT NULL,
              key TEXT NOT NULL,
              content TEXT NOT NULL,
              category TEXT NOT NULL DEFAULT 'core',
              created_at TEXT NOT NULL,
              updated_at TEXT NOT NULL,
              UNIQUE(workspace_id, key)
            );

            CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
              key, content,
              content='workspace_memories',
              content_rowid='id',
              tokenize='porter unicode61'
            );

            CREATE TRIGGER IF NOT EXISTS workspace_memories_ai AFTER INSERT ON workspace_memories BEGIN
              INSERT INTO memories_fts(rowid, key, content) VALUES (new.id, new.key, new.content);
            END;

            CREATE TRIGGER IF NOT EXISTS workspace_memories_ad AFTER DELETE ON workspace_memories BEGIN
              INSERT INTO memories_fts(memories_fts, rowid, key, content) VALUES ('delete', old.id, old.key, old.content);
            END;

            CREATE TRIGGER IF NOT EXISTS workspace_memories_au AFTER UPDATE ON workspace_memories BEGIN
              INSERT INTO memories_fts(memories_fts, rowid, key, content) VALUES ('delete', old.id, old.key, old.content);
              INSERT INTO memories_fts(rowid, key, content) VALUES (new.id, new.key, new.content);
            END;

            CREATE TABLE IF NOT EXISTS continuation_state (
              pty_id TEXT PRIMARY KEY,
              workspace_id TEXT NOT NULL,
              goal TEXT NOT NULL,
              max_iterations INTEGER NOT NULL,
              current_iteration INTEGER NOT NULL,
              status TEXT NOT NULL,
              require_prompt INTEGER NOT NULL,
              quiet_delay_ms INTEGER NOT NULL,
              updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS scheduled_tasks (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              workspace_id TEXT NOT NULL,
              spec TEXT NOT NULL,
              created_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    // -- workspaces ---------------------------------------------------

    pub fn upsert_workspace(&self, id: &str, path: &str, name: &str) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO workspaces (id, path, name, last_opened, pinned, config)
            VALUES (?1, ?2, ?3, ?4, 0, '{}')
            ON CONFLICT(path) DO UPDATE SET
              id = excluded.id,
              name = excluded.name,
              last_opened = excluded.last_opened
            "#,
            params![id, path, name, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, path, name, last_opened, pinned, config
            FROM workspaces
            ORDER BY pinned DESC, last_opened DESC
            LIMIT 20
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            let last_opened: String = row.get(3)?;
            let pinned: i64 = row.get(4)?;
            Ok(Workspace {
                id: row.get(0)?,
                path: PathBuf::from(row.get::<_, String>(1)?),
                name: row.get(2)?,
                last_opened: parse_rfc3339(&last_opened).map_err(to_sql_err)?,
                pinned: pinned != 0,
                config: row.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // -- memories -------------------------------------------------------

    pub fn store_memory(
        &self,
        workspace_id: &str,
        key: &str,
        content: &str,
        category: MemoryCategory,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            r#"
            INSERT INTO workspace_memories (workspace_id, key, content, category, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT(workspace_id, key) DO UPDATE SET
              content = excluded.content,
              category = excluded.category,
              updated_at = excluded.updated_at
            "#,
            params![workspace_id, key, content, category.as_str(), now],
        )?;
        Ok(())
    }

    /// Search memories, preferring BM25-ranked FTS5 and falling back to an
    /// escaped `LIKE` scan only on an FTS5 syntax error.
    pub fn search_memory(&self, workspace_id: &str, query: &str) -> Result<Vec<Memory>> {
        match self.search_memory_fts(workspace_id, query) {
            Ok(rows) => Ok(rows),
            Err(ForgeError::Database(rusqlite::Error::SqliteFailure(err, Some(msg))))
                if is_fts_syntax_error(&msg) =>
            {
                let _ = err;
                self.search_memory_like(workspace_id, query)
            }
            Err(e) => Err(e),
        }
    }

    fn search_memory_fts(&self, workspace_id: &str, query: &str) -> Result<Vec<Memory>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT m.id, m.workspace_id, m.key, m.content, m.category, m.created_at, m.updated_at
            FROM workspace_memories m
            JOIN memories_fts f ON f.rowid = m.id
            WHERE m.workspace_id = ?1 AND memories_fts MATCH ?2
            ORDER BY bm25(memories_fts)
            LIMIT 10
            "#,
        )?;
        let rows = stmt.query_map(params![workspace_id, query], map_memory_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn search_memory_like(&self, workspace_id: &str, query: &str) -> Result<Vec<Memory>> {
        let pattern = format!("%{}%", escape_like(query));
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, workspace_id, key, content, category, created_at, updated_at
            FROM workspace_memories
            WHERE workspace_id = ?1 AND (key || ' ' || content) LIKE ?2 ESCAPE '\'
            ORDER BY updated_at DESC
            LIMIT 10
            "#,
        )?;
        let rows = stmt.query_map(params![workspace_id, pattern], map_memory_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn list_memories(
        &self,
        workspace_id: &str,
        category: Option<MemoryCategory>,
    ) -> Result<Vec<Memory>> {
        let rows = if let Some(category) = category {
            let mut stmt = self.conn.prepare(
                r#"
                SELECT id, workspace_id, key, content, category, created_at, updated_at
                FROM workspace_memories
                WHERE workspace_id = ?1 AND category = ?2
                ORDER BY updated_at DESC
                "#,
            )?;
            let mapped = stmt.query_map(params![workspace_id, category.as_str()], map_memory_row)?;
            let mut out = Vec::new();
            for row in mapped {
                out.push(row?);
            }
            out
        } else {
            let mut stmt = self.conn.prepare(
                r#"
                SELECT id, workspace_id, key, content, category, created_at, updated_at
                FROM workspace_memories
                WHERE workspace_id = ?1
                ORDER BY updated_at DESC
                "#,
            )?;
            let mapped = stmt.query_map(params![workspace_id], map_memory_row)?;
            let mut out = Vec::new();
            for row in mapped {
                out.push(row?);
            }
            out
        };
        Ok(rows)
    }

    pub fn delete_memory(&self, workspace_id: &str, key: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM workspace_memories WHERE workspace_id = ?1 AND key = ?2",
            params![workspace_id, key],
        )?;
        Ok(())
    }

    // -- agent sessions ---------------------------------------------------

    pub fn create_agent_session(&self, session: &AgentSession) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO agent_sessions (
              id, workspace_id, cli_type, goal, status, iteration_count,
              token_input, token_output, started_at, ended_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                session.id,
                session.workspace_id,
                session.cli_type.to_string(),
                session.goal,
                agent_status_str(session.status),
                session.iteration_count,
                session.token_input,
                session.token_output,
                session.started_at.to_rfc3339(),
                session.ended_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn end_agent_session(&self, id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE agent_sessions SET status = 'ended', ended_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn increment_session_iteration(&self, id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE agent_sessions SET iteration_count = iteration_count + 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    pub fn list_active_sessions(&self, workspace_id: &str) -> Result<Vec<AgentSession>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, workspace_id, cli_type, goal, status, iteration_count,
                   token_input, token_output, started_at, ended_at
            FROM agent_sessions
            WHERE workspace_id = ?1 AND status = 'active'
            ORDER BY started_at DESC
            "#,
        )?;
        let rows = stmt.query_map(params![workspace_id], map_agent_session_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // -- continuation checkpoints -----------------------------------------

    pub fn save_continuation_state(&self, state: &ContinuationState) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO continuation_state (
              pty_id, workspace_id, goal, max_iterations, current_iteration,
              status, require_prompt, quiet_delay_ms, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(pty_id) DO UPDATE SET
              workspace_id = excluded.workspace_id,
              goal = excluded.goal,
              max_iterations = excluded.max_iterations,
              current_iteration = excluded.current_iteration,
              status = excluded.status,
              require_prompt = excluded.require_prompt,
              quiet_delay_ms = excluded.quiet_delay_ms,
              updated_at = excluded.updated_at
            "#,
            params![
                state.pty_id,
                state.workspace_id,
                state.goal,
                state.max_iterations,
                state.current_iteration,
                continuation_status_str(state.status),
                state.require_prompt,
                state.quiet_delay_ms,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn update_continuation_iteration(&self, pty_id: &str, current_iteration: u32) -> Result<()> {
        self.conn.execute(
            "UPDATE continuation_state SET current_iteration = ?1, updated_at = ?2 WHERE pty_id = ?3",
            params![current_iteration, Utc::now().to_rfc3339(), pty_id],
        )?;
        Ok(())
    }

    pub fn delete_continuation_state(&self, pty_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM continuation_state WHERE pty_id = ?1",
            params![pty_id],
        )?;
        Ok(())
    }

    pub fn get_continuation_state(&self, pty_id: &str) -> Result<Option<ContinuationCheckpoint>> {
        self.conn
            .query_row(
                r#"
                SELECT pty_id, workspace_id, goal, max_iterations, current_iteration,
                       status, require_prompt, quiet_delay_ms
                FROM continuation_state WHERE pty_id = ?1
                "#,
                params![pty_id],
                |row| {
                    Ok(ContinuationCheckpoint {
                        pty_id: row.get(0)?,
                        workspace_id: row.get(1)?,
                        goal: row.get(2)?,
                        max_iterations: row.get(3)?,
                        current_iteration: row.get(4)?,
                        status: row.get::<_, String>(5)?,
                        require_prompt: row.get(6)?,
                        quiet_delay_ms: row.get(7)?,
                    })
                },
            )
            .optional()
            .map_err(ForgeError::from)
    }
}

/// A raw continuation checkpoint row, reported back to callers after a
/// crash or refresh without resurrecting a live timer.
#[derive(Debug, Clone)]
pub struct ContinuationCheckpoint {
    pub pty_id: String,
    pub workspace_id: String,
    pub goal: String,
    pub max_iterations: u32,
    pub current_iteration: u32,
    pub status: String,
    pub require_prompt: bool,
    pub quiet_delay_ms: u64,
}

fn map_memory_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;
    Ok(Memory {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        key: row.get(2)?,
        content: row.get(3)?,
        category: MemoryCategory::from_str(&row.get::<_, String>(4)?).map_err(to_sql_err)?,
        created_at: parse_rfc3339(&created_at).map_err(to_sql_err)?,
        updated_at: parse_rfc3339(&updated_at).map_err(to_sql_err)?,
    })
}

fn map_agent_session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentSession> {
    let started_at: String = row.get(8)?;
    let ended_at: Option<String> = row.get(9)?;
    Ok(AgentSession {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        cli_type: AgentType::parse(&row.get::<_, String>(2)?).map_err(to_sql_err)?,
        goal: row.get(3)?,
        status: agent_status_from_str(&row.get::<_, String>(4)?).map_err(to_sql_err)?,
        iteration_count: row.get(5)?,
        token_input: row.get(6)?,
        token_output: row.get(7)?,
        started_at: parse_rfc3339(&started_at).map_err(to_sql_err)?,
        ended_at: ended_at
            .map(|s| parse_rfc3339(&s))
            .transpose()
            .map_err(to_sql_err)?,
    })
}

fn agent_status_str(status: AgentSessionStatus) -> &'static str {
    match status {
        AgentSessionStatus::Active => "active",
        AgentSessionStatus::Ended => "ended",
    }
}

fn agent_status_from_str(value: &str) -> Result<AgentSessionStatus> {
    match value {
        "active" => Ok(AgentSessionStatus::Active),
        "ended" => Ok(AgentSessionStatus::Ended),
        other => Err(ForgeError::Validation(format!(
            "unknown agent session status '{}'",
            other
        ))),
    }
}

fn continuation_status_str(status: ContinuationStatus) -> &'static str {
    match status {
        ContinuationStatus::Running => "running",
        ContinuationStatus::Paused => "paused",
        ContinuationStatus::Done => "done",
        ContinuationStatus::MaxReached => "max_reached",
        ContinuationStatus::Cancelled => "cancelled",
    }
}

/// Escape `\`, `%`, `_` for use inside a `LIKE ... ESCAPE '\'` pattern.
fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' | '%' | '_' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

fn is_fts_syntax_error(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    lower.contains("fts5: syntax error") || lower.contains("malformed match")
}

fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ForgeError::Database(rusqlite::Error::InvalidColumnType(
            0,
            format!("invalid timestamp '{}': {}", value, e),
            rusqlite::types::Type::Text,
        )))
}

fn to_sql_err(err: ForgeError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::ContinuationState;

    fn sample_session(workspace_id: &str) -> AgentSession {
        AgentSession::new(
            "sess-1".into(),
            workspace_id.into(),
            AgentType::Claude,
            Some("fix the bug".into()),
        )
    }

    #[test]
    fn round_trips_workspaces() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_workspace("abc123", "/tmp/proj", "proj").unwrap();
        let ws = store.list_workspaces().unwrap();
        assert_eq!(ws.len(), 1);
        assert_eq!(ws[0].id, "abc123");

        store.upsert_workspace("def456", "/tmp/proj", "proj-renamed").unwrap();
        let ws = store.list_workspaces().unwrap();
        assert_eq!(ws.len(), 1, "path conflict should update in place, not insert");
        assert_eq!(ws[0].id, "def456");
        assert_eq!(ws[0].name, "proj-renamed");
    }

    #[test]
    fn round_trips_memory_and_fts_search() {
        let store = Store::open_in_memory().unwrap();
        store
            .store_memory("w1", "k1", "the quick brown fox", MemoryCategory::Core)
            .unwrap();
        let found = store.list_memories("w1", None).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].content, "the quick brown fox");

        store
            .store_memory("w1", "k1", "jumps over the lazy dog", MemoryCategory::Core)
            .unwrap();
        let found = store.list_memories("w1", None).unwrap();
        assert_eq!(found.len(), 1, "same key should upsert, not duplicate");
        assert_eq!(found[0].content, "jumps over the lazy dog");

        let results = store.search_memory("w1", "lazy").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, "k1");
    }

    #[test]
    fn falls_back_to_like_on_fts_syntax_error() {
        let store = Store::open_in_memory().unwrap();
        store
            .store_memory("w1", "k1", "hello world", MemoryCategory::Core)
            .unwrap();
        // Unbalanced quote is invalid FTS5 query syntax.
        let results = store.search_memory("w1", "hel lo\"").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, "k1");
    }

    #[test]
    fn escapes_like_metacharacters() {
        assert_eq!(escape_like("50%_done\\x"), "50\\%\\_done\\\\x");
    }

    #[test]
    fn agent_session_lifecycle() {
        let store = Store::open_in_memory().unwrap();
        let session = sample_session("w1");
        store.create_agent_session(&session).unwrap();
        assert_eq!(store.list_active_sessions("w1").unwrap().len(), 1);

        store.increment_session_iteration(&session.id).unwrap();
        let active = store.list_active_sessions("w1").unwrap();
        assert_eq!(active[0].iteration_count, 1);

        store.end_agent_session(&session.id).unwrap();
        assert_eq!(store.list_active_sessions("w1").unwrap().len(), 0);
    }

    #[test]
    fn continuation_checkpoint_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let state = ContinuationState::new("pty-1".into(), "w1".into(), "keep going".into(), 20);
        store.save_continuation_state(&state).unwrap();

        let checkpoint = store.get_continuation_state("pty-1").unwrap().unwrap();
        assert_eq!(checkpoint.current_iteration, 0);

        store.update_continuation_iteration("pty-1", 3).unwrap();
        let checkpoint = store.get_continuation_state("pty-1").unwrap().unwrap();
        assert_eq!(checkpoint.current_iteration, 3);

        store.delete_continuation_state("pty-1").unwrap();
        assert!(store.get_continuation_state("pty-1").unwrap().is_none());
    }
}
