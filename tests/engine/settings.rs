//! User-settings operations: defaults, partial updates, persistence, and the
//! disabled-mode in-memory fallback.

use savepoint::engine::{EngineConfig, ProgressEngine};
use savepoint::settings::{SettingsPatch, UserSettings};
use savepoint::store::sqlite::SqliteStore;
use savepoint::store::traits::LocalStore;

async fn open_engine() -> ProgressEngine<SqliteStore> {
    ProgressEngine::open_in_memory(EngineConfig::default()).await
}

#[tokio::test]
async fn fresh_store_returns_exact_defaults() {
    let engine = open_engine().await;
    let settings = engine.load_settings().await.unwrap();
    assert_eq!(settings, UserSettings::default());
}

#[tokio::test]
async fn patch_merges_onto_current_settings() {
    let engine = open_engine().await;

    let merged = engine
        .save_settings(SettingsPatch {
            sound_enabled: Some(false),
            music_volume: Some(0.3),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(!merged.sound_enabled);
    assert!((merged.music_volume - 0.3).abs() < f32::EPSILON);
    assert!(merged.show_hints, "untouched field keeps its default");

    // A later patch only touches its own fields.
    let merged = engine
        .save_settings(SettingsPatch {
            locale: Some("fr".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(merged.locale, "fr");
    assert!(!merged.sound_enabled, "earlier patch survives");

    let loaded = engine.load_settings().await.unwrap();
    assert_eq!(loaded, merged);
}

#[tokio::test]
async fn settings_survive_engine_reconstruction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("saves.db");
    let path = path.to_str().unwrap();

    {
        let engine = ProgressEngine::open_sqlite(path, EngineConfig::default()).await;
        engine
            .save_settings(SettingsPatch {
                high_contrast: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    let engine = ProgressEngine::open_sqlite(path, EngineConfig::default()).await;
    let settings = engine.load_settings().await.unwrap();
    assert!(settings.high_contrast);
}

#[tokio::test]
async fn unreadable_stored_settings_fall_back_to_defaults() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    store.initialize().unwrap();
    store.put_settings("not json at all").unwrap();

    let engine = ProgressEngine::with_store(store, EngineConfig::default());
    let settings = engine.load_settings().await.unwrap();
    assert_eq!(settings, UserSettings::default());
}

#[tokio::test]
async fn disabled_engine_keeps_settings_in_memory() {
    let engine: ProgressEngine<SqliteStore> = ProgressEngine::disabled(EngineConfig::default());

    let settings = engine.load_settings().await.unwrap();
    assert_eq!(settings, UserSettings::default());

    engine
        .save_settings(SettingsPatch {
            show_hints: Some(false),
            ..Default::default()
        })
        .await
        .unwrap();

    let settings = engine.load_settings().await.unwrap();
    assert!(!settings.show_hints);
}
