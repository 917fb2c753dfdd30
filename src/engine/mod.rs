//! ProgressEngine — orchestration layer that owns all read/write/merge/
//! migrate logic on top of a `LocalStore`.
//!
//! The engine is an explicit object: the application's composition root
//! constructs it once and passes it by reference to every consumer. There is
//! no global accessor. An engine without a store (`disabled`) degrades every
//! operation to an empty result instead of failing loudly, so a missing
//! storage facility never crashes the surrounding game UI.

pub mod autosave;
pub mod conflict;
pub mod merge;
pub mod migrate;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{Result, SavepointError};
use crate::settings::{SettingsPatch, UserSettings};
use crate::store::sqlite::SqliteStore;
use crate::store::traits::LocalStore;
use crate::types::{
    CommandHistory, ConflictStrategy, EventKind, EventRecord, GameStateSnapshot, Resolution,
    SaveConflict, SaveResult, SaveRow, SavedGameState,
};

use self::autosave::{AutosaveSnapshot, SnapshotProvider};
use self::migrate::MigrationChain;

// ============================================================================
// Helpers
// ============================================================================

/// Wall-clock time as Unix milliseconds.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Fresh record key. Not stable across saves.
pub(crate) fn new_record_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn build_event(
    kind: EventKind,
    game_id: Option<String>,
    session_id: Option<String>,
    detail: Option<serde_json::Value>,
) -> EventRecord {
    EventRecord {
        id: new_record_id(),
        game_id,
        session_id,
        kind,
        timestamp: now_ms(),
        detail,
    }
}

fn row_from_saved(save: &SavedGameState) -> Result<SaveRow> {
    let state = serde_json::to_value(&save.state)
        .map_err(|e| SavepointError::Internal(format!("serialize state: {e}")))?;
    let command_history = save
        .command_history
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| SavepointError::Internal(format!("serialize command_history: {e}")))?;
    Ok(SaveRow {
        id: save.id.clone(),
        game_id: save.game_id.clone(),
        session_id: save.session_id.clone(),
        schema_version: save.schema_version,
        save_version: save.save_version,
        base_version: save.base_version,
        timestamp: save.timestamp,
        state,
        command_history,
    })
}

/// Migrate a stored row and deserialize it into the typed save shape.
fn hydrate_row(migrations: &MigrationChain, row: &SaveRow) -> Result<SavedGameState> {
    let outcome = migrations.migrate(row.state.clone(), row.schema_version, &row.id, &row.game_id)?;

    let state: GameStateSnapshot =
        serde_json::from_value(outcome.state).map_err(|e| SavepointError::Corrupt {
            id: row.id.clone(),
            field: "state".to_string(),
            source: Box::new(e),
        })?;

    let command_history: Option<CommandHistory> = row
        .command_history
        .clone()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| SavepointError::Corrupt {
            id: row.id.clone(),
            field: "command_history".to_string(),
            source: Box::new(e),
        })?;

    Ok(SavedGameState {
        id: row.id.clone(),
        game_id: row.game_id.clone(),
        session_id: row.session_id.clone(),
        schema_version: migrations.current_version(),
        save_version: row.save_version,
        base_version: row.base_version,
        timestamp: row.timestamp,
        state,
        command_history,
    })
}

/// The unconditional write primitive: read the current most-recent record
/// for the game, bump its version, insert a new record. Runs the read and
/// the write in one store transaction, so the computed version is atomic
/// within this process. `base_version` defaults to the version just read.
fn write_new_save<S: LocalStore>(
    store: &S,
    keep_last: Option<usize>,
    schema_version: u32,
    game_id: &str,
    session_id: &str,
    mut state: GameStateSnapshot,
    command_history: Option<CommandHistory>,
    base_version: Option<u64>,
) -> Result<String> {
    state.normalize();
    let state_value = serde_json::to_value(&state)
        .map_err(|e| SavepointError::Internal(format!("serialize state: {e}")))?;
    let history_value = command_history
        .map(|h| serde_json::to_value(&h))
        .transpose()
        .map_err(|e| SavepointError::Internal(format!("serialize command_history: {e}")))?;

    store.transaction(move |s| {
        let latest = s.latest_save_for_game(game_id)?;
        let observed_version = latest.as_ref().map(|r| r.save_version);

        let row = SaveRow {
            id: new_record_id(),
            game_id: game_id.to_string(),
            session_id: session_id.to_string(),
            schema_version,
            save_version: observed_version.unwrap_or(0) + 1,
            base_version: base_version.or(observed_version),
            timestamp: now_ms(),
            state: state_value,
            command_history: history_value,
        };
        s.put_save(&row)?;
        s.append_event(&build_event(
            EventKind::SaveCreated,
            Some(game_id.to_string()),
            Some(session_id.to_string()),
            Some(json!({"saveId": row.id, "saveVersion": row.save_version})),
        ))?;
        if let Some(keep) = keep_last {
            s.prune_saves(game_id, keep)?;
        }
        Ok(row.id)
    })
}

/// Commit a resolved conflict candidate and apply retention.
fn commit_candidate<S: LocalStore>(
    s: &S,
    keep_last: Option<usize>,
    candidate: &SavedGameState,
) -> Result<()> {
    let row = row_from_saved(candidate)?;
    s.put_save(&row)?;
    s.append_event(&build_event(
        EventKind::SaveCreated,
        Some(candidate.game_id.clone()),
        Some(candidate.session_id.clone()),
        Some(json!({"saveId": candidate.id, "saveVersion": candidate.save_version})),
    ))?;
    if let Some(keep) = keep_last {
        s.prune_saves(&candidate.game_id, keep)?;
    }
    Ok(())
}

// ============================================================================
// EngineConfig
// ============================================================================

#[derive(Debug, Default)]
pub struct EngineConfig {
    pub conflict_strategy: ConflictStrategy,
    /// Keep only the newest N saves per game. `None` preserves the full
    /// save history.
    pub keep_last_per_game: Option<usize>,
    pub migrations: MigrationChain,
}

// ============================================================================
// ProgressEngine
// ============================================================================

pub struct ProgressEngine<S: LocalStore> {
    /// `None` when the storage facility is unavailable — disabled mode.
    store: Option<Arc<S>>,
    migrations: Arc<MigrationChain>,
    strategy: Mutex<ConflictStrategy>,
    keep_last_per_game: Option<usize>,
    /// Settings surface in disabled mode.
    settings_fallback: Mutex<UserSettings>,
    autosave: Mutex<Option<JoinHandle<()>>>,
}

impl ProgressEngine<SqliteStore> {
    /// Open a file-backed engine. If the storage facility cannot be opened
    /// or initialized, the engine degrades to disabled mode instead of
    /// failing.
    pub async fn open_sqlite(path: &str, config: EngineConfig) -> Self {
        match SqliteStore::open(path).and_then(initialized) {
            Ok(store) => Self::with_store(store, config),
            Err(e) => {
                tracing::warn!("local store unavailable at {path}: {e}; persistence disabled");
                Self::disabled(config)
            }
        }
    }

    /// Open an in-memory engine (useful for tests and ephemeral sessions).
    pub async fn open_in_memory(config: EngineConfig) -> Self {
        match SqliteStore::open_in_memory().and_then(initialized) {
            Ok(store) => Self::with_store(store, config),
            Err(e) => {
                tracing::warn!("in-memory store unavailable: {e}; persistence disabled");
                Self::disabled(config)
            }
        }
    }
}

fn initialized(mut store: SqliteStore) -> Result<SqliteStore> {
    store.initialize()?;
    Ok(store)
}

impl<S: LocalStore + 'static> ProgressEngine<S> {
    /// Build an engine over an already-initialized store. This is the
    /// dependency-injection constructor for composition roots.
    pub fn with_store(store: S, config: EngineConfig) -> Self {
        Self {
            store: Some(Arc::new(store)),
            migrations: Arc::new(config.migrations),
            strategy: Mutex::new(config.conflict_strategy),
            keep_last_per_game: config.keep_last_per_game,
            settings_fallback: Mutex::new(UserSettings::default()),
            autosave: Mutex::new(None),
        }
    }

    /// An engine with no storage facility: every operation returns an empty
    /// result and settings live in memory.
    pub fn disabled(config: EngineConfig) -> Self {
        Self {
            store: None,
            migrations: Arc::new(config.migrations),
            strategy: Mutex::new(config.conflict_strategy),
            keep_last_per_game: config.keep_last_per_game,
            settings_fallback: Mutex::new(UserSettings::default()),
            autosave: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// The persistence format version this engine writes.
    pub fn schema_version(&self) -> u32 {
        self.migrations.current_version()
    }

    pub fn set_conflict_strategy(&self, strategy: ConflictStrategy) {
        *self.strategy.lock() = strategy;
    }

    pub fn conflict_strategy(&self) -> ConflictStrategy {
        *self.strategy.lock()
    }

    // -----------------------------------------------------------------------
    // Saves
    // -----------------------------------------------------------------------

    /// Unconditional save. Returns the new record id, or `None` in disabled
    /// mode. Does not detect conflicts — this is the primitive that
    /// `save_with_conflict_check` builds on and what the auto-save timer
    /// calls directly.
    pub async fn save_progress(
        &self,
        game_id: &str,
        session_id: &str,
        state: GameStateSnapshot,
        command_history: Option<CommandHistory>,
        base_version: Option<u64>,
    ) -> Result<Option<String>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let id = write_new_save(
            store.as_ref(),
            self.keep_last_per_game,
            self.schema_version(),
            game_id,
            session_id,
            state,
            command_history,
            base_version,
        )?;
        Ok(Some(id))
    }

    /// Conflict-checked save. A conflict exists when a current record is
    /// stored and `base_version` does not equal its `save_version`; the
    /// configured strategy then decides whether the candidate commits
    /// (`Local`, and `Merge` — which additionally signals the caller to
    /// involve the user) or is rejected (`Remote` — the caller must re-base
    /// and retry).
    pub async fn save_with_conflict_check(
        &self,
        game_id: &str,
        session_id: &str,
        state: GameStateSnapshot,
        command_history: Option<CommandHistory>,
        base_version: u64,
    ) -> Result<SaveResult> {
        let Some(store) = &self.store else {
            return Ok(SaveResult::disabled());
        };
        let strategy = self.conflict_strategy();
        let keep_last = self.keep_last_per_game;
        let schema_version = self.schema_version();
        let migrations = &self.migrations;

        let mut state = state;
        state.normalize();

        store.as_ref().transaction(move |s| {
            let current = s.latest_save_for_game(game_id)?;

            let Some(current_row) = current else {
                // Nothing stored yet — no conflict possible.
                let id = write_new_save(
                    s,
                    keep_last,
                    schema_version,
                    game_id,
                    session_id,
                    state,
                    command_history,
                    Some(base_version),
                )?;
                return Ok(SaveResult::saved(id));
            };

            if base_version == current_row.save_version {
                let id = write_new_save(
                    s,
                    keep_last,
                    schema_version,
                    game_id,
                    session_id,
                    state,
                    command_history,
                    Some(base_version),
                )?;
                return Ok(SaveResult::saved(id));
            }

            // Stale base version: build the candidate (not yet written) and
            // let the strategy decide.
            let remote = hydrate_row(migrations, &current_row)?;
            let candidate = SavedGameState {
                id: new_record_id(),
                game_id: game_id.to_string(),
                session_id: session_id.to_string(),
                schema_version,
                save_version: current_row.save_version + 1,
                base_version: Some(base_version),
                timestamp: now_ms(),
                state,
                command_history,
            };

            let resolution = conflict::resolve(&candidate, &remote, strategy);
            s.append_event(&build_event(
                EventKind::ConflictDetected,
                Some(game_id.to_string()),
                Some(session_id.to_string()),
                Some(json!({
                    "baseVersion": base_version,
                    "currentVersion": current_row.save_version,
                    "strategy": strategy,
                    "resolution": resolution,
                })),
            ))?;

            let conflict = SaveConflict {
                local_save: candidate.clone(),
                remote_save: remote,
                resolution,
            };

            match resolution {
                Resolution::Remote => Ok(SaveResult::rejected(conflict)),
                // Merge commits like Local at the storage layer; the tag
                // tells the caller automatic resolution was inappropriate.
                Resolution::Local | Resolution::Merge => {
                    commit_candidate(s, keep_last, &candidate)?;
                    Ok(SaveResult::resolved(candidate.id.clone(), conflict))
                }
            }
        })
    }

    /// The most recent save for a game across all sessions, migrated to the
    /// current schema version.
    pub async fn load_progress(&self, game_id: &str) -> Result<Option<SavedGameState>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        match store.latest_save_for_game(game_id)? {
            Some(row) => Ok(Some(hydrate_row(&self.migrations, &row)?)),
            None => Ok(None),
        }
    }

    /// The most recent save written by a specific session — used to resume a
    /// tab's in-flight session rather than the game's global latest.
    pub async fn load_by_session(&self, session_id: &str) -> Result<Option<SavedGameState>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        match store.latest_save_for_session(session_id)? {
            Some(row) => Ok(Some(hydrate_row(&self.migrations, &row)?)),
            None => Ok(None),
        }
    }

    /// Every save, newest first, for save-management UI.
    pub async fn get_all_saves(&self) -> Result<Vec<SavedGameState>> {
        let Some(store) = &self.store else {
            return Ok(Vec::new());
        };
        store
            .all_saves()?
            .iter()
            .map(|row| hydrate_row(&self.migrations, row))
            .collect()
    }

    /// Remove one save. Returns whether a record was removed.
    pub async fn delete_save(&self, save_id: &str) -> Result<bool> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        store.as_ref().transaction(|s| {
            let Some(row) = s.get_save(save_id)? else {
                return Ok(false);
            };
            s.delete_save(save_id)?;
            s.append_event(&build_event(
                EventKind::SaveDeleted,
                Some(row.game_id),
                Some(row.session_id),
                Some(json!({"saveId": save_id, "saveVersion": row.save_version})),
            ))?;
            Ok(true)
        })
    }

    /// Remove every save for a game. Returns the number of records removed.
    pub async fn clear_game_saves(&self, game_id: &str) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        store.as_ref().transaction(|s| {
            let removed = s.delete_saves_for_game(game_id)?;
            if removed > 0 {
                s.append_event(&build_event(
                    EventKind::GameCleared,
                    Some(game_id.to_string()),
                    None,
                    Some(json!({"removed": removed})),
                ))?;
            }
            Ok(removed)
        })
    }

    // -----------------------------------------------------------------------
    // Event log
    // -----------------------------------------------------------------------

    pub async fn events_for_game(&self, game_id: &str) -> Result<Vec<EventRecord>> {
        let Some(store) = &self.store else {
            return Ok(Vec::new());
        };
        store.events_for_game(game_id)
    }

    pub async fn events_for_session(&self, session_id: &str) -> Result<Vec<EventRecord>> {
        let Some(store) = &self.store else {
            return Ok(Vec::new());
        };
        store.events_for_session(session_id)
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    /// The stored settings, or the built-in defaults on a fresh store.
    /// Unreadable stored settings fall back to defaults with a warning —
    /// settings are last-write-wins and recoverable.
    pub async fn load_settings(&self) -> Result<UserSettings> {
        let Some(store) = &self.store else {
            return Ok(self.settings_fallback.lock().clone());
        };
        match store.get_settings()? {
            None => Ok(UserSettings::default()),
            Some(raw) => Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("stored settings unreadable ({e}); using defaults");
                UserSettings::default()
            })),
        }
    }

    /// Merge a partial update onto the current settings and persist the
    /// result. Returns the merged settings.
    pub async fn save_settings(&self, patch: SettingsPatch) -> Result<UserSettings> {
        let Some(store) = &self.store else {
            let mut guard = self.settings_fallback.lock();
            patch.apply(&mut guard);
            return Ok(guard.clone());
        };
        store.as_ref().transaction(move |s| {
            let mut settings = match s.get_settings()? {
                Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                    tracing::warn!("stored settings unreadable ({e}); using defaults");
                    UserSettings::default()
                }),
                None => UserSettings::default(),
            };
            patch.apply(&mut settings);

            let raw = serde_json::to_string(&settings)
                .map_err(|e| SavepointError::Internal(format!("serialize settings: {e}")))?;
            s.put_settings(&raw)?;
            s.append_event(&build_event(EventKind::SettingsUpdated, None, None, None))?;
            Ok(settings)
        })
    }

    // -----------------------------------------------------------------------
    // Auto-save
    // -----------------------------------------------------------------------

    /// Start the recurring auto-save timer. Each tick polls `provider` and
    /// commits the snapshot through the unconditional `save_progress` path —
    /// auto-save is last-writer-wins by design. Only one timer runs per
    /// engine; starting a new one cancels any prior.
    pub fn start_autosave(&self, interval: Duration, provider: Arc<dyn SnapshotProvider>) {
        let mut guard = self.autosave.lock();
        if let Some(handle) = guard.take() {
            handle.abort();
        }

        let Some(store) = self.store.clone() else {
            tracing::warn!("auto-save not started: local store unavailable");
            return;
        };

        let keep_last = self.keep_last_per_game;
        let schema_version = self.migrations.current_version();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The interval fires immediately once; the first save should
            // wait a full period.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(snapshot) = provider.snapshot().await else {
                    continue;
                };
                let AutosaveSnapshot {
                    game_id,
                    session_id,
                    state,
                    command_history,
                } = snapshot;
                match write_new_save(
                    store.as_ref(),
                    keep_last,
                    schema_version,
                    &game_id,
                    &session_id,
                    state,
                    command_history,
                    None,
                ) {
                    Ok(save_id) => {
                        tracing::debug!(save_id = %save_id, game_id = %game_id, "auto-save committed");
                    }
                    Err(e) => {
                        tracing::warn!(game_id = %game_id, "auto-save failed: {e}");
                    }
                }
            }
        });
        *guard = Some(handle);
    }

    /// Cancel the auto-save timer, if one is running.
    pub fn stop_autosave(&self) {
        if let Some(handle) = self.autosave.lock().take() {
            handle.abort();
        }
    }

    pub fn autosave_running(&self) -> bool {
        self.autosave.lock().is_some()
    }

    /// Stop auto-save and release the store. Subsequent operations behave as
    /// in disabled mode. The underlying connection closes when the last
    /// reference is dropped (the aborted auto-save task may hold one
    /// briefly).
    pub async fn close(&mut self) {
        self.stop_autosave();
        self.store = None;
    }
}

impl<S: LocalStore> Drop for ProgressEngine<S> {
    fn drop(&mut self) {
        if let Some(handle) = self.autosave.lock().take() {
            handle.abort();
        }
    }
}
