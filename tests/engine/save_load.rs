//! Engine save/load/delete tests.

use savepoint::engine::{EngineConfig, ProgressEngine};
use savepoint::store::sqlite::SqliteStore;
use savepoint::types::{CommandHistory, EventKind, GameStateSnapshot, PlacedLabel};
use serde_json::json;

// ============================================================================
// Helpers
// ============================================================================

async fn open_engine() -> ProgressEngine<SqliteStore> {
    ProgressEngine::open_in_memory(EngineConfig::default()).await
}

fn snapshot(score: u32, completed: &[&str]) -> GameStateSnapshot {
    let mut state = GameStateSnapshot::default();
    state.score = score;
    for z in completed {
        state.completed_zone_ids.insert(z.to_string());
        state.visible_zone_ids.insert(z.to_string());
    }
    state
}

// ============================================================================
// Round trip
// ============================================================================

#[tokio::test]
async fn round_trip_preserves_snapshot() {
    let engine = open_engine().await;

    let mut state = snapshot(42, &["z1", "z3"]);
    state.placed_labels = vec![PlacedLabel {
        label_id: "l1".to_string(),
        zone_id: "z1".to_string(),
        is_correct: true,
    }];
    state.hints_used = 2;
    state.incorrect_attempts = 1;
    state.elapsed_time_ms = 90_000;
    state
        .mechanics
        .insert("quiz".to_string(), json!({"answered": 3, "streak": 2}));

    let history = CommandHistory {
        commands: vec![json!({"op": "place", "labelId": "l1"})],
        cursor: 1,
    };

    let id = engine
        .save_progress("g1", "sess-1", state.clone(), Some(history.clone()), None)
        .await
        .unwrap()
        .expect("engine enabled");

    let loaded = engine.load_progress("g1").await.unwrap().expect("save exists");
    assert_eq!(loaded.id, id);
    assert_eq!(loaded.state, state);
    assert_eq!(loaded.command_history, Some(history));
    assert_eq!(loaded.save_version, 1);
    assert_eq!(loaded.schema_version, engine.schema_version());
}

#[tokio::test]
async fn load_progress_none_for_unknown_game() {
    let engine = open_engine().await;
    assert!(engine.load_progress("nope").await.unwrap().is_none());
}

// ============================================================================
// Version monotonicity
// ============================================================================

#[tokio::test]
async fn save_versions_are_exactly_one_to_n() {
    let engine = open_engine().await;
    for i in 1..=5u32 {
        engine
            .save_progress("g1", "sess-1", snapshot(i, &[]), None, None)
            .await
            .unwrap();
    }

    let all = engine.get_all_saves().await.unwrap();
    let versions: Vec<u64> = all.iter().map(|s| s.save_version).collect();
    assert_eq!(versions, vec![5, 4, 3, 2, 1]);

    let latest = engine.load_progress("g1").await.unwrap().unwrap();
    assert_eq!(latest.save_version, 5);
    assert_eq!(latest.state.score, 5);
}

#[tokio::test]
async fn base_version_defaults_to_observed_version() {
    let engine = open_engine().await;
    engine
        .save_progress("g1", "sess-1", snapshot(1, &[]), None, None)
        .await
        .unwrap();
    engine
        .save_progress("g1", "sess-1", snapshot(2, &[]), None, None)
        .await
        .unwrap();

    let all = engine.get_all_saves().await.unwrap();
    // Newest first: second save observed version 1; first observed nothing.
    assert_eq!(all[0].base_version, Some(1));
    assert_eq!(all[1].base_version, None);
}

#[tokio::test]
async fn explicit_base_version_is_persisted() {
    let engine = open_engine().await;
    engine
        .save_progress("g1", "sess-1", snapshot(1, &[]), None, None)
        .await
        .unwrap();
    engine
        .save_progress("g1", "sess-2", snapshot(2, &[]), None, Some(1))
        .await
        .unwrap();

    let latest = engine.load_progress("g1").await.unwrap().unwrap();
    assert_eq!(latest.base_version, Some(1));
}

// ============================================================================
// Session-scoped loads
// ============================================================================

#[tokio::test]
async fn load_by_session_returns_that_sessions_latest() {
    let engine = open_engine().await;
    engine
        .save_progress("g1", "sess-1", snapshot(1, &[]), None, None)
        .await
        .unwrap();
    engine
        .save_progress("g1", "sess-2", snapshot(2, &[]), None, None)
        .await
        .unwrap();
    engine
        .save_progress("g1", "sess-1", snapshot(3, &[]), None, None)
        .await
        .unwrap();

    let s2 = engine.load_by_session("sess-2").await.unwrap().unwrap();
    assert_eq!(s2.save_version, 2);
    assert_eq!(s2.state.score, 2);

    let s1 = engine.load_by_session("sess-1").await.unwrap().unwrap();
    assert_eq!(s1.save_version, 3);

    assert!(engine.load_by_session("sess-9").await.unwrap().is_none());
}

// ============================================================================
// Deletion
// ============================================================================

#[tokio::test]
async fn delete_save_removes_one_record() {
    let engine = open_engine().await;
    let id = engine
        .save_progress("g1", "sess-1", snapshot(1, &[]), None, None)
        .await
        .unwrap()
        .unwrap();
    engine
        .save_progress("g1", "sess-1", snapshot(2, &[]), None, None)
        .await
        .unwrap();

    assert!(engine.delete_save(&id).await.unwrap());
    assert!(!engine.delete_save(&id).await.unwrap());

    let all = engine.get_all_saves().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].save_version, 2);
}

#[tokio::test]
async fn clear_game_saves_purges_whole_game() {
    let engine = open_engine().await;
    for _ in 0..3 {
        engine
            .save_progress("g1", "sess-1", snapshot(1, &[]), None, None)
            .await
            .unwrap();
    }
    engine
        .save_progress("g2", "sess-1", snapshot(1, &[]), None, None)
        .await
        .unwrap();

    assert_eq!(engine.clear_game_saves("g1").await.unwrap(), 3);
    assert!(engine.load_progress("g1").await.unwrap().is_none());
    assert!(engine.load_progress("g2").await.unwrap().is_some());
}

// ============================================================================
// Retention
// ============================================================================

#[tokio::test]
async fn retention_prunes_beyond_keep_last() {
    let config = EngineConfig {
        keep_last_per_game: Some(2),
        ..Default::default()
    };
    let engine = ProgressEngine::open_in_memory(config).await;

    for i in 1..=4u32 {
        engine
            .save_progress("g1", "sess-1", snapshot(i, &[]), None, None)
            .await
            .unwrap();
    }

    let all = engine.get_all_saves().await.unwrap();
    let versions: Vec<u64> = all.iter().map(|s| s.save_version).collect();
    assert_eq!(versions, vec![4, 3]);

    // Versions keep counting from the surviving head.
    engine
        .save_progress("g1", "sess-1", snapshot(5, &[]), None, None)
        .await
        .unwrap();
    let latest = engine.load_progress("g1").await.unwrap().unwrap();
    assert_eq!(latest.save_version, 5);
}

// ============================================================================
// Event log
// ============================================================================

#[tokio::test]
async fn saves_and_deletes_are_logged() {
    let engine = open_engine().await;
    let id = engine
        .save_progress("g1", "sess-1", snapshot(1, &[]), None, None)
        .await
        .unwrap()
        .unwrap();
    engine.delete_save(&id).await.unwrap();
    engine.clear_game_saves("g1").await.unwrap();

    let events = engine.events_for_game("g1").await.unwrap();
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&EventKind::SaveCreated));
    assert!(kinds.contains(&EventKind::SaveDeleted));
    // clear on an already-empty game logs nothing
    assert!(!kinds.contains(&EventKind::GameCleared));

    let session_events = engine.events_for_session("sess-1").await.unwrap();
    assert!(!session_events.is_empty());
}

#[tokio::test]
async fn clearing_a_game_with_saves_is_logged() {
    let engine = open_engine().await;
    engine
        .save_progress("g1", "sess-1", snapshot(1, &[]), None, None)
        .await
        .unwrap();
    engine.clear_game_saves("g1").await.unwrap();

    let events = engine.events_for_game("g1").await.unwrap();
    assert!(events.iter().any(|e| e.kind == EventKind::GameCleared));
}

// ============================================================================
// Disabled mode
// ============================================================================

#[tokio::test]
async fn disabled_engine_returns_empty_results() {
    let engine: ProgressEngine<SqliteStore> = ProgressEngine::disabled(EngineConfig::default());
    assert!(!engine.is_enabled());

    let id = engine
        .save_progress("g1", "sess-1", snapshot(1, &[]), None, None)
        .await
        .unwrap();
    assert!(id.is_none());

    assert!(engine.load_progress("g1").await.unwrap().is_none());
    assert!(engine.load_by_session("sess-1").await.unwrap().is_none());
    assert!(engine.get_all_saves().await.unwrap().is_empty());
    assert!(!engine.delete_save("x").await.unwrap());
    assert_eq!(engine.clear_game_saves("g1").await.unwrap(), 0);
    assert!(engine.events_for_game("g1").await.unwrap().is_empty());
}

#[tokio::test]
async fn close_degrades_to_disabled_mode() {
    let mut engine = open_engine().await;
    engine
        .save_progress("g1", "sess-1", snapshot(1, &[]), None, None)
        .await
        .unwrap();

    engine.close().await;
    assert!(!engine.is_enabled());
    assert!(engine.load_progress("g1").await.unwrap().is_none());
}

// ============================================================================
// State normalization
// ============================================================================

#[tokio::test]
async fn completed_zones_become_visible_on_save() {
    let engine = open_engine().await;
    let mut state = GameStateSnapshot::default();
    state.completed_zone_ids.insert("z1".to_string());
    // z1 deliberately left out of visible_zone_ids

    engine
        .save_progress("g1", "sess-1", state, None, None)
        .await
        .unwrap();

    let loaded = engine.load_progress("g1").await.unwrap().unwrap();
    assert!(loaded.state.visible_zone_ids.contains("z1"));
}
