//! Session and context persistence for Chatloom
//!
//! Every public operation opens its own connection and commits as one
//! independent transaction. Concurrent operations on the same session are
//! not additionally serialized here; each transaction is atomic on its own.

use crate::error::{ChatloomError, Result};
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use tracing::debug;

pub mod types;
pub use types::{ContextEntry, Role, Session, SessionInfo};

/// Storage backend for sessions and their context entries
#[derive(Clone)]
pub struct SessionStore {
    db_path: PathBuf,
}

impl SessionStore {
    /// Create a new store in the user's data directory
    ///
    /// The database path can be overridden with the `CHATLOOM_SESSIONS_DB`
    /// environment variable, which makes it easy to point the library at a
    /// test database without touching the application data dir.
    pub fn new() -> Result<Self> {
        if let Ok(override_path) = std::env::var("CHATLOOM_SESSIONS_DB") {
            return Self::new_with_path(override_path);
        }

        let proj_dirs = ProjectDirs::from("com", "chatloom", "chatloom")
            .ok_or_else(|| ChatloomError::Storage("Could not determine data directory".into()))?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .map_err(|e| ChatloomError::Storage(format!("Failed to create data directory: {}", e)))?;

        Self::new_with_path(data_dir.join("sessions.db"))
    }

    /// Create a new store that uses the specified database path
    ///
    /// # Examples
    ///
    /// ```
    /// use chatloom::store::SessionStore;
    ///
    /// let store = SessionStore::new_with_path("/tmp/chatloom_test_sessions.db").unwrap();
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ChatloomError::Storage(format!("Failed to create database directory: {}", e))
            })?;
        }

        let store = Self { db_path };
        store.init()?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)
            .map_err(|e| ChatloomError::Storage(format!("Failed to open database: {}", e)))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| ChatloomError::Storage(format!("Failed to enable foreign keys: {}", e)))?;
        Ok(conn)
    }

    /// Initialize the database schema
    fn init(&self) -> Result<()> {
        let conn = self.open()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                topic TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                total_tokens INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions (user_id, is_active);
            CREATE TABLE IF NOT EXISTS context_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL REFERENCES sessions (session_id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                reasoning_content TEXT,
                name TEXT,
                tool_calls TEXT,
                tool_call_id TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_entries_session ON context_entries (session_id);",
        )
        .map_err(|e| ChatloomError::Storage(format!("Failed to create tables: {}", e)))?;
        Ok(())
    }

    /// Create a new active session for `user_id`
    ///
    /// Within one transaction, deactivates every currently active session
    /// of the user and inserts the new session as active, upholding the
    /// at-most-one-active invariant at every commit point.
    pub fn create(&self, user_id: &str, topic: &str) -> Result<Session> {
        let session = Session {
            session_id: uuid::Uuid::new_v4().simple().to_string(),
            user_id: user_id.to_string(),
            topic: topic.to_string(),
            is_active: true,
            total_tokens: 0,
            created_at: Utc::now(),
        };

        let mut conn = self.open()?;
        let tx = conn
            .transaction()
            .map_err(|e| ChatloomError::Storage(format!("Failed to start transaction: {}", e)))?;

        tx.execute(
            "UPDATE sessions SET is_active = 0 WHERE user_id = ? AND is_active = 1",
            params![user_id],
        )
        .map_err(|e| ChatloomError::Storage(format!("Failed to deactivate sessions: {}", e)))?;

        tx.execute(
            "INSERT INTO sessions (session_id, user_id, topic, is_active, total_tokens, created_at)
             VALUES (?, ?, ?, 1, 0, ?)",
            params![
                session.session_id,
                session.user_id,
                session.topic,
                session.created_at.to_rfc3339()
            ],
        )
        .map_err(|e| ChatloomError::Storage(format!("Failed to insert session: {}", e)))?;

        tx.commit()
            .map_err(|e| ChatloomError::Storage(format!("Failed to commit transaction: {}", e)))?;

        debug!(session_id = %session.session_id, user_id, "Created session");
        Ok(session)
    }

    /// Get the user's active session, if any (newest first on ties)
    pub fn get_active(&self, user_id: &str) -> Result<Option<Session>> {
        let conn = self.open()?;
        conn.query_row(
            "SELECT session_id, user_id, topic, is_active, total_tokens, created_at
             FROM sessions WHERE user_id = ? AND is_active = 1
             ORDER BY created_at DESC LIMIT 1",
            params![user_id],
            row_to_session,
        )
        .optional()
        .map_err(|e| ChatloomError::Storage(format!("Failed to query active session: {}", e)).into())
    }

    /// Switch the user's active session to `session_id`
    ///
    /// Fails closed (`false`) when the target does not exist or is not
    /// owned by `user_id`; returns `true` without writes when the target
    /// is already active.
    pub fn switch(&self, user_id: &str, session_id: &str) -> Result<bool> {
        let mut conn = self.open()?;
        let tx = conn
            .transaction()
            .map_err(|e| ChatloomError::Storage(format!("Failed to start transaction: {}", e)))?;

        let target: Option<(String, bool)> = tx
            .query_row(
                "SELECT user_id, is_active FROM sessions WHERE session_id = ?",
                params![session_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| ChatloomError::Storage(format!("Failed to query session: {}", e)))?;

        let (owner, is_active) = match target {
            Some(found) => found,
            None => return Ok(false),
        };
        if owner != user_id {
            return Ok(false);
        }
        if is_active {
            return Ok(true);
        }

        tx.execute(
            "UPDATE sessions SET is_active = 0 WHERE user_id = ? AND is_active = 1",
            params![user_id],
        )
        .map_err(|e| ChatloomError::Storage(format!("Failed to deactivate sessions: {}", e)))?;
        tx.execute(
            "UPDATE sessions SET is_active = 1 WHERE session_id = ?",
            params![session_id],
        )
        .map_err(|e| ChatloomError::Storage(format!("Failed to activate session: {}", e)))?;

        tx.commit()
            .map_err(|e| ChatloomError::Storage(format!("Failed to commit transaction: {}", e)))?;
        Ok(true)
    }

    /// Delete a session and all its context entries
    ///
    /// Fails closed (`false`) when the target does not exist or is not
    /// owned by `user_id`.
    pub fn delete(&self, user_id: &str, session_id: &str) -> Result<bool> {
        let mut conn = self.open()?;
        let tx = conn
            .transaction()
            .map_err(|e| ChatloomError::Storage(format!("Failed to start transaction: {}", e)))?;

        let owner: Option<String> = tx
            .query_row(
                "SELECT user_id FROM sessions WHERE session_id = ?",
                params![session_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| ChatloomError::Storage(format!("Failed to query session: {}", e)))?;

        match owner {
            Some(owner) if owner == user_id => {}
            _ => return Ok(false),
        }

        tx.execute(
            "DELETE FROM context_entries WHERE session_id = ?",
            params![session_id],
        )
        .map_err(|e| ChatloomError::Storage(format!("Failed to delete entries: {}", e)))?;
        tx.execute(
            "DELETE FROM sessions WHERE session_id = ?",
            params![session_id],
        )
        .map_err(|e| ChatloomError::Storage(format!("Failed to delete session: {}", e)))?;

        tx.commit()
            .map_err(|e| ChatloomError::Storage(format!("Failed to commit transaction: {}", e)))?;

        debug!(session_id, user_id, "Deleted session");
        Ok(true)
    }

    /// Append one context entry, preserving insertion order
    ///
    /// Insert-only; prior entries are never updated or removed.
    pub fn append(&self, session_id: &str, entry: &ContextEntry) -> Result<()> {
        let tool_calls_json = match &entry.tool_calls {
            Some(calls) => Some(
                serde_json::to_string(calls)
                    .map_err(|e| ChatloomError::Storage(format!("Failed to serialize tool calls: {}", e)))?,
            ),
            None => None,
        };

        let conn = self.open()?;
        conn.execute(
            "INSERT INTO context_entries
             (session_id, role, content, reasoning_content, name, tool_calls, tool_call_id)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                session_id,
                entry.role.as_str(),
                entry.content,
                entry.reasoning_content,
                entry.name,
                tool_calls_json,
                entry.tool_call_id
            ],
        )
        .map_err(|e| ChatloomError::Storage(format!("Failed to insert entry: {}", e)))?;
        Ok(())
    }

    /// Load the full persisted history in insertion order
    pub fn load_ordered(&self, session_id: &str) -> Result<Vec<ContextEntry>> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(
                "SELECT role, content, reasoning_content, name, tool_calls, tool_call_id
                 FROM context_entries WHERE session_id = ? ORDER BY id ASC",
            )
            .map_err(|e| ChatloomError::Storage(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params![session_id], row_to_entry)
            .map_err(|e| ChatloomError::Storage(format!("Failed to query entries: {}", e)))?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(
                row.map_err(|e| ChatloomError::Storage(format!("Failed to read entry: {}", e)))?,
            );
        }
        Ok(entries)
    }

    /// Add reported token usage to the session's running counter
    ///
    /// No-op when `tokens <= 0`, so the counter is monotonically
    /// non-decreasing.
    pub fn add_token_usage(&self, session_id: &str, tokens: i64) -> Result<()> {
        if tokens <= 0 {
            return Ok(());
        }
        let conn = self.open()?;
        conn.execute(
            "UPDATE sessions SET total_tokens = total_tokens + ? WHERE session_id = ?",
            params![tokens, session_id],
        )
        .map_err(|e| ChatloomError::Storage(format!("Failed to update token usage: {}", e)))?;
        Ok(())
    }

    /// Update a session's topic label
    pub fn set_topic(&self, session_id: &str, topic: &str) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE sessions SET topic = ? WHERE session_id = ?",
            params![topic, session_id],
        )
        .map_err(|e| ChatloomError::Storage(format!("Failed to update topic: {}", e)))?;
        Ok(())
    }

    /// List all of a user's sessions, newest first
    pub fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(
                "SELECT session_id, user_id, topic, is_active, total_tokens, created_at
                 FROM sessions WHERE user_id = ? ORDER BY created_at DESC",
            )
            .map_err(|e| ChatloomError::Storage(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params![user_id], row_to_session)
            .map_err(|e| ChatloomError::Storage(format!("Failed to query sessions: {}", e)))?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(
                row.map_err(|e| ChatloomError::Storage(format!("Failed to read session: {}", e)))?,
            );
        }
        Ok(sessions)
    }

    /// Summary of the user's active session (user/assistant message count
    /// excludes tool traffic), or `None` when no session is active
    pub fn session_info(&self, user_id: &str) -> Result<Option<SessionInfo>> {
        let session = match self.get_active(user_id)? {
            Some(session) => session,
            None => return Ok(None),
        };

        let conn = self.open()?;
        let message_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM context_entries
                 WHERE session_id = ? AND role IN ('user', 'assistant')",
                params![session.session_id],
                |row| row.get(0),
            )
            .map_err(|e| ChatloomError::Storage(format!("Failed to count entries: {}", e)))?;

        Ok(Some(SessionInfo {
            session,
            message_count: message_count as usize,
        }))
    }
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    let created_at_raw: String = row.get(5)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(Session {
        session_id: row.get(0)?,
        user_id: row.get(1)?,
        topic: row.get(2)?,
        is_active: row.get(3)?,
        total_tokens: row.get(4)?,
        created_at,
    })
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<ContextEntry> {
    let role_raw: String = row.get(0)?;
    let role = Role::parse(&role_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown role: {}", role_raw).into(),
        )
    })?;
    let tool_calls_json: Option<String> = row.get(4)?;
    let tool_calls = match tool_calls_json {
        Some(json) => Some(serde_json::from_str(&json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?),
        None => None,
    };
    Ok(ContextEntry {
        role,
        content: row.get(1)?,
        reasoning_content: row.get(2)?,
        name: row.get(3)?,
        tool_calls,
        tool_call_id: row.get(5)?,
    })
}
