//! SQLite storage backend.
//!
//! Implements `LocalStore` using rusqlite (bundled). The connection is
//! protected by a `parking_lot::ReentrantMutex<RefCell<Connection>>` so that
//! `transaction()` can hold the lock while calling the closure, which also
//! needs to lock in order to execute SQL.

use std::cell::{Cell, RefCell};

use parking_lot::ReentrantMutex;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::error::{Result, SavepointError, StorageError};
use crate::types::{EventKind, EventRecord, SaveRow};

use super::traits::LocalStore;

/// Well-known key for the singleton settings record.
const SETTINGS_KEY: &str = "user:settings";

const SAVE_COLS: &str = "id, game_id, session_id, schema_version, save_version, \
     base_version, timestamp, state, command_history";

const EVENT_COLS: &str = "id, game_id, session_id, kind, timestamp, detail";

/// Map a rusqlite error to a `SavepointError`.
fn storage_err(e: rusqlite::Error) -> SavepointError {
    SavepointError::Storage(StorageError::Sqlite(e))
}

// ============================================================================
// SqliteStore
// ============================================================================

/// SQLite storage backend.
///
/// `ReentrantMutex` allows `transaction()` to hold the guard while the
/// closure re-acquires it for individual SQL operations.
pub struct SqliteStore {
    conn: ReentrantMutex<RefCell<rusqlite::Connection>>,
    initialized: bool,
}

impl SqliteStore {
    /// Open a file-backed SQLite database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = rusqlite::Connection::open(path).map_err(storage_err)?;
        Ok(Self {
            conn: ReentrantMutex::new(RefCell::new(conn)),
            initialized: false,
        })
    }

    /// Open an in-memory SQLite database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(storage_err)?;
        Ok(Self {
            conn: ReentrantMutex::new(RefCell::new(conn)),
            initialized: false,
        })
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    /// Execute `f` with a shared reference to the underlying connection.
    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T>,
    {
        let guard = self.conn.lock();
        let conn = guard.borrow();
        f(&conn).map_err(storage_err)
    }

    /// Parse a single rusqlite row into a `SaveRow`.
    fn row_to_save(row: &rusqlite::Row<'_>) -> rusqlite::Result<SaveRow> {
        let id: String = row.get(0)?;
        let game_id: String = row.get(1)?;
        let session_id: String = row.get(2)?;
        let schema_version: u32 = row.get(3)?;
        let save_version: i64 = row.get(4)?;
        let base_version: Option<i64> = row.get(5)?;
        let timestamp: i64 = row.get(6)?;
        let state_str: String = row.get(7)?;
        let history_str: Option<String> = row.get(8)?;

        let state: Value = serde_json::from_str(&state_str)
            .map_err(|e| rusqlite::Error::InvalidParameterName(format!("state: {e}")))?;

        let command_history: Option<Value> = history_str
            .map(|s| {
                serde_json::from_str(&s).map_err(|e| {
                    rusqlite::Error::InvalidParameterName(format!("command_history: {e}"))
                })
            })
            .transpose()?;

        Ok(SaveRow {
            id,
            game_id,
            session_id,
            schema_version,
            save_version: save_version as u64,
            base_version: base_version.map(|v| v as u64),
            timestamp,
            state,
            command_history,
        })
    }

    /// Parse a single rusqlite row into an `EventRecord`.
    fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRecord> {
        let id: String = row.get(0)?;
        let game_id: Option<String> = row.get(1)?;
        let session_id: Option<String> = row.get(2)?;
        let kind_str: String = row.get(3)?;
        let timestamp: i64 = row.get(4)?;
        let detail_str: Option<String> = row.get(5)?;

        let kind = EventKind::parse(&kind_str).ok_or_else(|| {
            rusqlite::Error::InvalidParameterName(format!("kind: {kind_str}"))
        })?;

        let detail: Option<Value> = detail_str
            .map(|s| {
                serde_json::from_str(&s)
                    .map_err(|e| rusqlite::Error::InvalidParameterName(format!("detail: {e}")))
            })
            .transpose()?;

        Ok(EventRecord {
            id,
            game_id,
            session_id,
            kind,
            timestamp,
            detail,
        })
    }

    fn query_saves(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<SaveRow>> {
        let guard = self.conn.lock();
        let conn = guard.borrow();
        let mut stmt = conn.prepare_cached(sql).map_err(storage_err)?;
        let rows = stmt.query_map(args, Self::row_to_save).map_err(storage_err)?;
        let records: rusqlite::Result<Vec<_>> = rows.collect();
        records.map_err(storage_err)
    }

    fn query_events(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<EventRecord>> {
        let guard = self.conn.lock();
        let conn = guard.borrow();
        let mut stmt = conn.prepare_cached(sql).map_err(storage_err)?;
        let rows = stmt
            .query_map(args, Self::row_to_event)
            .map_err(storage_err)?;
        let records: rusqlite::Result<Vec<_>> = rows.collect();
        records.map_err(storage_err)
    }
}

// ============================================================================
// LocalStore implementation
// ============================================================================

impl LocalStore for SqliteStore {
    fn initialize(&mut self) -> Result<()> {
        let guard = self.conn.lock();
        let conn = guard.borrow();

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;",
        )
        .map_err(storage_err)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS saves (
                id              TEXT PRIMARY KEY,
                game_id         TEXT NOT NULL,
                session_id      TEXT NOT NULL,
                schema_version  INTEGER NOT NULL DEFAULT 1,
                save_version    INTEGER NOT NULL,
                base_version    INTEGER,
                timestamp       INTEGER NOT NULL,
                state           TEXT NOT NULL DEFAULT '{}',
                command_history TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_saves_game_time
                ON saves(game_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_saves_session_time
                ON saves(session_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_saves_time
                ON saves(timestamp);
            CREATE TABLE IF NOT EXISTS events (
                id         TEXT PRIMARY KEY,
                game_id    TEXT,
                session_id TEXT,
                kind       TEXT NOT NULL,
                timestamp  INTEGER NOT NULL,
                detail     TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_events_game_time
                ON events(game_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_session_time
                ON events(session_id, timestamp);
            CREATE TABLE IF NOT EXISTS settings (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )
        .map_err(storage_err)?;

        drop(conn);
        drop(guard);
        self.initialized = true;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    // -----------------------------------------------------------------------
    // Saves
    // -----------------------------------------------------------------------

    fn get_save(&self, id: &str) -> Result<Option<SaveRow>> {
        let guard = self.conn.lock();
        let conn = guard.borrow();
        let mut stmt = conn
            .prepare_cached(&format!("SELECT {SAVE_COLS} FROM saves WHERE id = ?1"))
            .map_err(storage_err)?;

        stmt.query_row(params![id], Self::row_to_save)
            .optional()
            .map_err(storage_err)
    }

    fn put_save(&self, row: &SaveRow) -> Result<()> {
        let state_str = serde_json::to_string(&row.state)
            .map_err(|e| SavepointError::Internal(format!("serialize state: {e}")))?;
        let history_str = row
            .command_history
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| SavepointError::Internal(format!("serialize command_history: {e}")))?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO saves \
                 (id, game_id, session_id, schema_version, save_version, \
                  base_version, timestamp, state, command_history) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    row.id,
                    row.game_id,
                    row.session_id,
                    row.schema_version,
                    row.save_version as i64,
                    row.base_version.map(|v| v as i64),
                    row.timestamp,
                    state_str,
                    history_str,
                ],
            )
            .map(|_| ())
        })
    }

    fn latest_save_for_game(&self, game_id: &str) -> Result<Option<SaveRow>> {
        let guard = self.conn.lock();
        let conn = guard.borrow();
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT {SAVE_COLS} FROM saves WHERE game_id = ?1 \
                 ORDER BY timestamp DESC, save_version DESC LIMIT 1"
            ))
            .map_err(storage_err)?;

        stmt.query_row(params![game_id], Self::row_to_save)
            .optional()
            .map_err(storage_err)
    }

    fn latest_save_for_session(&self, session_id: &str) -> Result<Option<SaveRow>> {
        let guard = self.conn.lock();
        let conn = guard.borrow();
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT {SAVE_COLS} FROM saves WHERE session_id = ?1 \
                 ORDER BY timestamp DESC, save_version DESC LIMIT 1"
            ))
            .map_err(storage_err)?;

        stmt.query_row(params![session_id], Self::row_to_save)
            .optional()
            .map_err(storage_err)
    }

    fn all_saves(&self) -> Result<Vec<SaveRow>> {
        self.query_saves(
            &format!("SELECT {SAVE_COLS} FROM saves ORDER BY timestamp DESC, save_version DESC"),
            &[],
        )
    }

    fn delete_save(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM saves WHERE id = ?1", params![id])
                .map(|n| n > 0)
        })
    }

    fn delete_saves_for_game(&self, game_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM saves WHERE game_id = ?1", params![game_id])
        })
    }

    fn prune_saves(&self, game_id: &str, keep: usize) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM saves WHERE game_id = ?1 AND id NOT IN ( \
                     SELECT id FROM saves WHERE game_id = ?1 \
                     ORDER BY timestamp DESC, save_version DESC LIMIT ?2)",
                params![game_id, keep as i64],
            )
        })
    }

    // -----------------------------------------------------------------------
    // Event log
    // -----------------------------------------------------------------------

    fn append_event(&self, event: &EventRecord) -> Result<()> {
        let detail_str = event
            .detail
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| SavepointError::Internal(format!("serialize detail: {e}")))?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO events (id, game_id, session_id, kind, timestamp, detail) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.id,
                    event.game_id,
                    event.session_id,
                    event.kind.as_str(),
                    event.timestamp,
                    detail_str,
                ],
            )
            .map(|_| ())
        })
    }

    fn events_for_game(&self, game_id: &str) -> Result<Vec<EventRecord>> {
        self.query_events(
            &format!(
                "SELECT {EVENT_COLS} FROM events WHERE game_id = ?1 ORDER BY timestamp DESC"
            ),
            &[&game_id],
        )
    }

    fn events_for_session(&self, session_id: &str) -> Result<Vec<EventRecord>> {
        self.query_events(
            &format!(
                "SELECT {EVENT_COLS} FROM events WHERE session_id = ?1 ORDER BY timestamp DESC"
            ),
            &[&session_id],
        )
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    fn get_settings(&self) -> Result<Option<String>> {
        let guard = self.conn.lock();
        let conn = guard.borrow();
        let mut stmt = conn
            .prepare_cached("SELECT value FROM settings WHERE key = ?1")
            .map_err(storage_err)?;

        stmt.query_row(params![SETTINGS_KEY], |row| row.get::<_, String>(0))
            .optional()
            .map_err(storage_err)
    }

    fn put_settings(&self, json: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
                params![SETTINGS_KEY, json],
            )
            .map(|_| ())
        })
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>,
    {
        // Use a SAVEPOINT so this composes with outer transactions.
        // Each invocation gets a unique name to avoid collisions when nested.
        // ReentrantMutex lets the closure re-acquire the lock for its SQL calls.
        thread_local! {
            static SP_COUNTER: Cell<u64> = const { Cell::new(0) };
        }
        let sp_name = SP_COUNTER.with(|c| {
            let n = c.get();
            c.set(n + 1);
            format!("sp_{n}")
        });

        {
            let guard = self.conn.lock();
            guard
                .borrow()
                .execute(&format!("SAVEPOINT {sp_name}"), [])
                .map_err(storage_err)?;
        }

        match f(self) {
            Ok(v) => {
                let guard = self.conn.lock();
                let release_ok = guard
                    .borrow()
                    .execute(&format!("RELEASE SAVEPOINT {sp_name}"), [])
                    .is_ok();
                drop(guard);
                if release_ok {
                    Ok(v)
                } else {
                    // Best-effort rollback to clean up the leaked savepoint
                    let guard = self.conn.lock();
                    let _ = guard
                        .borrow()
                        .execute(&format!("ROLLBACK TO SAVEPOINT {sp_name}"), []);
                    Err(storage_err(rusqlite::Error::SqliteFailure(
                        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                        Some("RELEASE SAVEPOINT failed".to_string()),
                    )))
                }
            }
            Err(e) => {
                let guard = self.conn.lock();
                let _ = guard
                    .borrow()
                    .execute(&format!("ROLLBACK TO SAVEPOINT {sp_name}"), []);
                Err(e)
            }
        }
    }
}
