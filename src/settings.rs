//! User settings — a single well-known record with last-write-wins
//! semantics. No versioning or conflict logic applies here.

use serde::{Deserialize, Serialize};

/// The singleton settings record. Stored under one fixed key, so the last
/// writer wins by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSettings {
    pub sound_enabled: bool,
    pub music_volume: f32,
    pub show_hints: bool,
    pub high_contrast: bool,
    pub locale: String,
    pub autosave_enabled: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            sound_enabled: true,
            music_volume: 0.8,
            show_hints: true,
            high_contrast: false,
            locale: "en".to_string(),
            autosave_enabled: true,
        }
    }
}

/// Partial settings update. `None` fields leave the current value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    pub sound_enabled: Option<bool>,
    pub music_volume: Option<f32>,
    pub show_hints: Option<bool>,
    pub high_contrast: Option<bool>,
    pub locale: Option<String>,
    pub autosave_enabled: Option<bool>,
}

impl SettingsPatch {
    /// Merge this patch onto `settings`.
    pub fn apply(&self, settings: &mut UserSettings) {
        if let Some(v) = self.sound_enabled {
            settings.sound_enabled = v;
        }
        if let Some(v) = self.music_volume {
            settings.music_volume = v;
        }
        if let Some(v) = self.show_hints {
            settings.show_hints = v;
        }
        if let Some(v) = self.high_contrast {
            settings.high_contrast = v;
        }
        if let Some(ref v) = self.locale {
            settings.locale = v.clone();
        }
        if let Some(v) = self.autosave_enabled {
            settings.autosave_enabled = v;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
