//! Asset index: the durable record of what the remote offers and what is
//! already mirrored.
//!
//! One SQLite row per remote asset tracks the renditions the remote reports,
//! the renditions present on disk, and the renditions whose last download
//! attempt failed. This enables:
//! - Skipping renditions that are already mirrored
//! - Resuming after a crash without re-downloading completed files
//! - Status reporting and verification against the data directory

pub mod db;
pub mod error;
pub mod schema;
pub mod types;

pub use db::{AssetIndex, SqliteAssetIndex};
pub use error::StateError;
pub use types::{AssetKind, AssetRecord, IndexSummary, Location, SyncRunStats};

/// Index file name, relative to the sync base directory.
pub const INDEX_FILENAME: &str = "_metadata.sqlite";
