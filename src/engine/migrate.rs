//! Migration chain: walks a stored snapshot forward through versioned
//! transforms, one step per schema version.

use serde_json::{json, Value};

use crate::error::{MigrationError, Result, SavepointError};

// ============================================================================
// Public Types
// ============================================================================

/// Closure type for snapshot migration between schema versions.
pub type SnapshotMigration = dyn Fn(Value) -> std::result::Result<Value, Box<dyn std::error::Error + Send + Sync>>
    + Send
    + Sync;

/// Ordered chain of snapshot transforms. Step `i` migrates schema version
/// `i + 1` to `i + 2`; the current format version is `steps + 1`.
pub struct MigrationChain {
    steps: Vec<Box<SnapshotMigration>>,
}

impl std::fmt::Debug for MigrationChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationChain")
            .field("steps", &self.steps.len())
            .field("current_version", &self.current_version())
            .finish()
    }
}

/// Result of migrating a snapshot through the version chain.
#[derive(Debug)]
pub struct MigrationOutcome {
    /// Migrated snapshot payload.
    pub state: Value,
    /// Original version the snapshot was at.
    pub migrated_from: u32,
    /// Number of migration steps applied (0 if already current).
    pub steps_applied: u32,
}

// ============================================================================
// MigrationChain
// ============================================================================

impl MigrationChain {
    /// A chain with no steps — current version 1, every load a pass-through.
    pub fn empty() -> Self {
        Self { steps: Vec::new() }
    }

    /// Append the transform for the next schema version.
    pub fn step<F>(mut self, migrate: F) -> Self
    where
        F: Fn(Value) -> std::result::Result<Value, Box<dyn std::error::Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        self.steps.push(Box::new(migrate));
        self
    }

    /// The schema version this chain migrates up to.
    pub fn current_version(&self) -> u32 {
        self.steps.len() as u32 + 1
    }

    /// Migrate a snapshot from `from_version` to the current version.
    ///
    /// `save_id` and `game_id` are used in error reporting only.
    pub fn migrate(
        &self,
        state: Value,
        from_version: u32,
        save_id: &str,
        game_id: &str,
    ) -> Result<MigrationOutcome> {
        let current_version = self.current_version();

        if from_version < 1 || from_version > current_version {
            return Err(SavepointError::Migration(MigrationError {
                game_id: game_id.to_string(),
                save_id: save_id.to_string(),
                from_version,
                to_version: current_version,
                failed_at: from_version,
                source: format!(
                    "Invalid source version: Must be between 1 and {current_version}"
                )
                .into(),
            }));
        }

        if from_version == current_version {
            return Ok(MigrationOutcome {
                state,
                migrated_from: from_version,
                steps_applied: 0,
            });
        }

        // Walk forward through the version chain. steps[0] migrates v1 -> v2.
        let mut current_data = state;
        let mut current_step = from_version;

        while current_step < current_version {
            let next_version = current_step + 1;

            let migrate_fn = self.steps.get((current_step - 1) as usize).ok_or_else(|| {
                SavepointError::Migration(MigrationError {
                    game_id: game_id.to_string(),
                    save_id: save_id.to_string(),
                    from_version,
                    to_version: current_version,
                    failed_at: next_version,
                    source: format!("Missing migration step for v{next_version}").into(),
                })
            })?;

            current_data = migrate_fn(current_data).map_err(|e| {
                SavepointError::Migration(MigrationError {
                    game_id: game_id.to_string(),
                    save_id: save_id.to_string(),
                    from_version,
                    to_version: current_version,
                    failed_at: next_version,
                    source: e,
                })
            })?;

            current_step = next_version;
        }

        Ok(MigrationOutcome {
            state: current_data,
            migrated_from: from_version,
            steps_applied: current_version - from_version,
        })
    }
}

impl Default for MigrationChain {
    fn default() -> Self {
        default_chain()
    }
}

// ============================================================================
// Default chain
// ============================================================================

/// The crate's built-in chain. Current version 2.
///
/// v1 snapshots stored whole-second elapsed time under `elapsedSecs` and
/// predate zone-visibility tracking and per-mechanic sub-records.
pub fn default_chain() -> MigrationChain {
    MigrationChain::empty().step(migrate_v1_to_v2)
}

fn migrate_v1_to_v2(
    mut state: Value,
) -> std::result::Result<Value, Box<dyn std::error::Error + Send + Sync>> {
    let obj = state
        .as_object_mut()
        .ok_or("snapshot payload is not an object")?;

    if let Some(secs) = obj.remove("elapsedSecs") {
        let secs = secs.as_u64().ok_or("elapsedSecs is not a number")?;
        obj.insert("elapsedTimeMs".to_string(), json!(secs * 1000));
    }

    // Before visibility tracking, every completed zone had been shown.
    if !obj.contains_key("visibleZoneIds") {
        let completed = obj
            .get("completedZoneIds")
            .cloned()
            .unwrap_or_else(|| json!([]));
        obj.insert("visibleZoneIds".to_string(), completed);
    }

    if !obj.contains_key("mechanics") {
        obj.insert("mechanics".to_string(), json!({}));
    }

    Ok(state)
}

// ============================================================================
// Tests
// ============================================================================
