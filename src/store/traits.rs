//! Storage facility trait for the persistence engine.
//!
//! `LocalStore` is the narrow raw I/O trait implemented by concrete backends
//! (currently SQLite). It exposes the three record collections — saves, the
//! event log, and settings — with the secondary-index queries the engine
//! needs: most-recent-by-game, most-recent-by-session, newest-first.

use crate::error::Result;
use crate::types::{EventRecord, SaveRow};

/// Low-level storage backend — raw record I/O with no merge or migration
/// semantics.
///
/// Implementors must be `Send + Sync` so they can be shared with the
/// auto-save task.
pub trait LocalStore: Send + Sync {
    /// Open (creating if absent) the three record collections and their
    /// secondary indexes.
    fn initialize(&mut self) -> Result<()>;

    /// Returns whether `initialize()` has been called.
    fn is_initialized(&self) -> bool;

    // -----------------------------------------------------------------------
    // Saves
    // -----------------------------------------------------------------------

    /// Fetch a single save by id. Returns `None` if it does not exist.
    fn get_save(&self, id: &str) -> Result<Option<SaveRow>>;

    /// Persist a new save record.
    fn put_save(&self, row: &SaveRow) -> Result<()>;

    /// The most recent save for a game across all sessions, by timestamp
    /// (save version breaks exact-timestamp ties).
    fn latest_save_for_game(&self, game_id: &str) -> Result<Option<SaveRow>>;

    /// The most recent save written by a specific session.
    fn latest_save_for_session(&self, session_id: &str) -> Result<Option<SaveRow>>;

    /// Every save record, newest first.
    fn all_saves(&self) -> Result<Vec<SaveRow>>;

    /// Remove one save. Returns whether a record was removed.
    fn delete_save(&self, id: &str) -> Result<bool>;

    /// Remove all saves for a game. Returns the number of records removed.
    fn delete_saves_for_game(&self, game_id: &str) -> Result<usize>;

    /// Drop all but the newest `keep` saves for a game. Returns the number
    /// of records pruned.
    fn prune_saves(&self, game_id: &str, keep: usize) -> Result<usize>;

    // -----------------------------------------------------------------------
    // Event log
    // -----------------------------------------------------------------------

    fn append_event(&self, event: &EventRecord) -> Result<()>;

    /// Events for a game, newest first.
    fn events_for_game(&self, game_id: &str) -> Result<Vec<EventRecord>>;

    /// Events for a session, newest first.
    fn events_for_session(&self, session_id: &str) -> Result<Vec<EventRecord>>;

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    /// Raw settings JSON, if any has been written.
    fn get_settings(&self) -> Result<Option<String>>;

    fn put_settings(&self, json: &str) -> Result<()>;

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Execute a closure inside a backend transaction.
    ///
    /// The closure receives a reference to `self`; implementations should
    /// begin a transaction before calling `f` and commit (or roll back on
    /// error) after it returns. Nested calls must compose.
    fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>;
}
