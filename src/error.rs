use thiserror::Error;

// ---------------------------------------------------------------------------
// StorageError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Save not found: {0}")]
    SaveNotFound(String),

    #[error("Local store not initialized. Call initialize() first.")]
    NotInitialized,

    #[error("Transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

// ---------------------------------------------------------------------------
// MigrationError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
#[error(
    "Migration failed for save {save_id} of game {game_id} \
     from v{from_version} to v{to_version} (failed at v{failed_at})"
)]
pub struct MigrationError {
    pub game_id: String,
    pub save_id: String,
    pub from_version: u32,
    pub to_version: u32,
    pub failed_at: u32,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

// ---------------------------------------------------------------------------
// SavepointError — top-level rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SavepointError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("Corrupt save record {id}: failed to parse \"{field}\" field")]
    Corrupt {
        id: String,
        field: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience alias — the default error type is `SavepointError`.
pub type Result<T, E = SavepointError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
