//! Conflict resolution — a pure decision over a (local candidate, stored
//! remote) save pair. Total and deterministic for identical inputs.

use std::cmp::Ordering;

use crate::types::{ConflictStrategy, Resolution, SavedGameState};

/// Decide which side of a conflict wins under `strategy`.
pub fn resolve(
    local: &SavedGameState,
    remote: &SavedGameState,
    strategy: ConflictStrategy,
) -> Resolution {
    match strategy {
        ConflictStrategy::LastWriteWins => last_write_wins(local, remote),
        ConflictStrategy::HigherProgress => {
            match local.state.progress_score().cmp(&remote.state.progress_score()) {
                Ordering::Greater => Resolution::Local,
                Ordering::Less => Resolution::Remote,
                // Exact tie falls back to timestamps.
                Ordering::Equal => last_write_wins(local, remote),
            }
        }
        ConflictStrategy::AskUser => Resolution::Merge,
    }
}

/// Strictly later timestamp wins; an exact tie favors the local candidate.
fn last_write_wins(local: &SavedGameState, remote: &SavedGameState) -> Resolution {
    if remote.timestamp > local.timestamp {
        Resolution::Remote
    } else {
        Resolution::Local
    }
}

// ============================================================================
// Tests
// ============================================================================
