//! Merge semantics for two divergent saves of the same game.
//!
//! Used when the caller decides to combine rather than pick a winner.
//! Cumulative metrics only grow, so numeric fields take the element-wise
//! maximum; set-like fields take unions with the local side winning
//! duplicate keys. Repeated application converges on a fixed point, though
//! this is deliberately not a full CRDT.

use std::collections::BTreeMap;

use crate::types::{CommandHistory, GameStateSnapshot, PlacedLabel, SavedGameState};

use super::{new_record_id, now_ms};

/// Combine `local` and `remote` into a new save record.
///
/// The result carries `save_version = max(local, remote) + 1`, a fresh id
/// and timestamp, and `local`'s game and session identity.
pub fn merge_saves(local: &SavedGameState, remote: &SavedGameState) -> SavedGameState {
    let mut state = merge_snapshots(&local.state, &remote.state);
    state.normalize();

    let command_history = merge_histories(
        local.command_history.as_ref(),
        remote.command_history.as_ref(),
    );

    SavedGameState {
        id: new_record_id(),
        game_id: local.game_id.clone(),
        session_id: local.session_id.clone(),
        schema_version: local.schema_version.max(remote.schema_version),
        save_version: local.save_version.max(remote.save_version) + 1,
        base_version: Some(remote.save_version),
        timestamp: now_ms(),
        state,
        command_history,
    }
}

fn merge_snapshots(local: &GameStateSnapshot, remote: &GameStateSnapshot) -> GameStateSnapshot {
    // Union keyed by (label_id, zone_id); local applied after remote so it
    // wins duplicate keys.
    let mut labels: BTreeMap<(String, String), PlacedLabel> = BTreeMap::new();
    for label in remote.placed_labels.iter().chain(local.placed_labels.iter()) {
        labels.insert(
            (label.label_id.clone(), label.zone_id.clone()),
            label.clone(),
        );
    }

    let mut completed_zone_ids = remote.completed_zone_ids.clone();
    completed_zone_ids.extend(local.completed_zone_ids.iter().cloned());

    let mut visible_zone_ids = remote.visible_zone_ids.clone();
    visible_zone_ids.extend(local.visible_zone_ids.iter().cloned());

    let mut mechanics = remote.mechanics.clone();
    mechanics.extend(local.mechanics.clone());

    GameStateSnapshot {
        placed_labels: labels.into_values().collect(),
        score: local.score.max(remote.score),
        completed_zone_ids,
        visible_zone_ids,
        hints_used: local.hints_used.max(remote.hints_used),
        incorrect_attempts: local.incorrect_attempts.max(remote.incorrect_attempts),
        elapsed_time_ms: local.elapsed_time_ms.max(remote.elapsed_time_ms),
        mechanics,
    }
}

/// The side with the longer undo stack is kept in full — no interleaving.
/// A tie keeps the local history.
fn merge_histories(
    local: Option<&CommandHistory>,
    remote: Option<&CommandHistory>,
) -> Option<CommandHistory> {
    match (local, remote) {
        (Some(l), Some(r)) => {
            if r.len() > l.len() {
                Some(r.clone())
            } else {
                Some(l.clone())
            }
        }
        (Some(l), None) => Some(l.clone()),
        (None, Some(r)) => Some(r.clone()),
        (None, None) => None,
    }
}

// ============================================================================
// Tests
// ============================================================================
