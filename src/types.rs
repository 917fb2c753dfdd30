use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Game snapshot
// ============================================================================

/// One label placed onto a zone by the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedLabel {
    pub label_id: String,
    pub zone_id: String,
    #[serde(default)]
    pub is_correct: bool,
}

/// The plain game state handed over by the game template. The engine persists
/// it verbatim and hands the same shape back on load.
///
/// `mechanics` is the open-ended set of per-mechanic progress sub-records
/// (each independent and optional) — opaque to the engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameStateSnapshot {
    pub placed_labels: Vec<PlacedLabel>,
    pub score: u32,
    pub completed_zone_ids: BTreeSet<String>,
    pub visible_zone_ids: BTreeSet<String>,
    pub hints_used: u32,
    pub incorrect_attempts: u32,
    pub elapsed_time_ms: u64,
    pub mechanics: BTreeMap<String, Value>,
}

impl GameStateSnapshot {
    /// Progress metric used by the higher-progress conflict strategy:
    /// completed zone count plus score.
    pub fn progress_score(&self) -> u64 {
        self.completed_zone_ids.len() as u64 + u64::from(self.score)
    }

    /// Restore the zone-set invariant: a completed zone is always visible.
    pub fn normalize(&mut self) {
        let completed: Vec<String> = self.completed_zone_ids.iter().cloned().collect();
        self.visible_zone_ids.extend(completed);
    }
}

/// Serialized undo/redo stack embedded in a save. Opaque to the engine
/// beyond length comparisons during merge.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandHistory {
    pub commands: Vec<Value>,
    /// Undo position within `commands`.
    pub cursor: usize,
}

impl CommandHistory {
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

// ============================================================================
// Saved game state
// ============================================================================

/// One persisted snapshot, fully migrated and deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedGameState {
    /// Record key, generated at save time. Not stable across saves.
    pub id: String,
    pub game_id: String,
    pub session_id: String,
    /// Persistence format version, used for migration.
    pub schema_version: u32,
    /// Per-game monotonic counter — the optimistic-concurrency check value.
    pub save_version: u64,
    /// The `save_version` the writer believed was current when composing
    /// this save. Only used to detect conflicts, never authoritative.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_version: Option<u64>,
    /// Wall-clock time of the save, Unix milliseconds.
    pub timestamp: i64,
    pub state: GameStateSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_history: Option<CommandHistory>,
}

/// Save record as stored — `state` and `command_history` are raw JSON,
/// migrated and deserialized by the engine on read.
#[derive(Debug, Clone)]
pub struct SaveRow {
    pub id: String,
    pub game_id: String,
    pub session_id: String,
    pub schema_version: u32,
    pub save_version: u64,
    pub base_version: Option<u64>,
    pub timestamp: i64,
    pub state: Value,
    pub command_history: Option<Value>,
}

// ============================================================================
// Conflicts
// ============================================================================

/// Which side of a conflict wins. `Merge` signals that automatic resolution
/// is inappropriate and the caller must combine or choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Local,
    Remote,
    Merge,
}

/// Configurable conflict resolution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    #[default]
    LastWriteWins,
    HigherProgress,
    AskUser,
}

/// A detected save conflict. Ephemeral — never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveConflict {
    /// The candidate the writer wanted to commit.
    pub local_save: SavedGameState,
    /// The record actually stored.
    pub remote_save: SavedGameState,
    pub resolution: Resolution,
}

/// Outcome of the conflict-checked save path.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveResult {
    pub success: bool,
    pub save_id: Option<String>,
    pub conflict: Option<SaveConflict>,
}

impl SaveResult {
    pub fn saved(save_id: String) -> Self {
        Self {
            success: true,
            save_id: Some(save_id),
            conflict: None,
        }
    }

    pub fn resolved(save_id: String, conflict: SaveConflict) -> Self {
        Self {
            success: true,
            save_id: Some(save_id),
            conflict: Some(conflict),
        }
    }

    pub fn rejected(conflict: SaveConflict) -> Self {
        Self {
            success: false,
            save_id: None,
            conflict: Some(conflict),
        }
    }

    /// The empty result returned when the engine runs without a store.
    pub fn disabled() -> Self {
        Self {
            success: false,
            save_id: None,
            conflict: None,
        }
    }
}

// ============================================================================
// Event log
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    SaveCreated,
    ConflictDetected,
    SaveDeleted,
    GameCleared,
    SettingsUpdated,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::SaveCreated => "save-created",
            EventKind::ConflictDetected => "conflict-detected",
            EventKind::SaveDeleted => "save-deleted",
            EventKind::GameCleared => "game-cleared",
            EventKind::SettingsUpdated => "settings-updated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "save-created" => Some(EventKind::SaveCreated),
            "conflict-detected" => Some(EventKind::ConflictDetected),
            "save-deleted" => Some(EventKind::SaveDeleted),
            "game-cleared" => Some(EventKind::GameCleared),
            "settings-updated" => Some(EventKind::SettingsUpdated),
            _ => None,
        }
    }
}

/// One entry in the append-only event log. Written in the same transaction
/// as the operation it records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: String,
    pub game_id: Option<String>,
    pub session_id: Option<String>,
    pub kind: EventKind,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub detail: Option<Value>,
}

// ============================================================================
// Tests
// ============================================================================
