//! Auto-save support types.
//!
//! The caller implements `SnapshotProvider`; the engine's recurring task
//! polls it once per tick and commits whatever it returns through the
//! unconditional save path.

use async_trait::async_trait;

use crate::types::{CommandHistory, GameStateSnapshot};

/// What the auto-save timer persists on a tick.
#[derive(Debug, Clone)]
pub struct AutosaveSnapshot {
    pub game_id: String,
    pub session_id: String,
    pub state: GameStateSnapshot,
    pub command_history: Option<CommandHistory>,
}

/// Caller-supplied snapshot source for the auto-save timer.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Called on every tick. Return `None` to skip the tick (e.g. nothing
    /// changed since the last save, or no game is active).
    async fn snapshot(&self) -> Option<AutosaveSnapshot>;
}
