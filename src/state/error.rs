//! Error types for the asset index.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the asset index. All of them are fatal to a sync pass.
#[derive(Error, Debug)]
pub enum StateError {
    /// Failed to open or create the database file.
    #[error("Failed to open database at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// Failed to run a database migration.
    #[error("Database migration failed: {0}")]
    Migration(#[from] rusqlite::Error),

    /// A query failed.
    #[error("Database query failed: {0}")]
    Query(String),

    /// Failed to spawn a blocking task.
    #[error("Failed to spawn blocking task: {0}")]
    Spawn(#[from] tokio::task::JoinError),

    /// The database schema version is newer than supported.
    #[error("Database schema version {found} is newer than supported version {expected}")]
    UnsupportedSchemaVersion { found: i32, expected: i32 },

    /// A partial update targeted an asset the index has never seen.
    #[error("Asset {0} is not in the index")]
    NotFound(String),

    /// A stored row could not be decoded.
    #[error("Corrupt index record for asset {asset_id}: field {field}: {reason}")]
    CorruptRecord {
        asset_id: String,
        field: &'static str,
        reason: String,
    },
}

impl StateError {
    /// Create a Query error from a rusqlite error.
    pub fn query(source: rusqlite::Error) -> Self {
        Self::Query(source.to_string())
    }

    pub(crate) fn corrupt(asset_id: &str, field: &'static str, reason: impl ToString) -> Self {
        Self::CorruptRecord {
            asset_id: asset_id.to_string(),
            field,
            reason: reason.to_string(),
        }
    }
}
