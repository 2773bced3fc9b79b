//! Database schema definitions and migrations.

use rusqlite::Connection;

use super::error::StateError;

/// Current schema version. Increment when making schema changes.
pub const SCHEMA_VERSION: i32 = 1;

/// Schema DDL for version 1.
///
/// Version sets are JSON arrays of rendition tokens; timestamps are Unix
/// seconds.
const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS photo_assets (
    asset_id TEXT PRIMARY KEY NOT NULL,
    filename TEXT NOT NULL,
    asset_kind TEXT NOT NULL,
    created_at INTEGER,
    added_at INTEGER,
    width INTEGER,
    height INTEGER,
    location_latitude REAL,
    location_longitude REAL,
    location_altitude REAL,
    available_versions TEXT NOT NULL DEFAULT '[]',
    downloaded_versions TEXT NOT NULL DEFAULT '[]',
    failed_versions TEXT NOT NULL DEFAULT '[]',
    last_sync_at INTEGER NOT NULL,
    remote_metadata TEXT NOT NULL DEFAULT 'null'
);

CREATE INDEX IF NOT EXISTS idx_photo_assets_last_sync ON photo_assets(last_sync_at);

CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    assets_seen INTEGER DEFAULT 0,
    renditions_downloaded INTEGER DEFAULT 0,
    renditions_failed INTEGER DEFAULT 0,
    bytes_downloaded INTEGER DEFAULT 0,
    asset_errors INTEGER DEFAULT 0,
    interrupted INTEGER DEFAULT 0,
    aborted INTEGER DEFAULT 0
);
"#;

/// Get the current schema version from the database.
pub(crate) fn get_schema_version(conn: &Connection) -> Result<i32, StateError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Set the schema version in the database.
fn set_schema_version(conn: &Connection, version: i32) -> Result<(), StateError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Initialize or migrate the database schema.
///
/// Idempotent on both new and existing databases.
pub(crate) fn migrate(conn: &Connection) -> Result<(), StateError> {
    let current_version = get_schema_version(conn)?;

    if current_version > SCHEMA_VERSION {
        return Err(StateError::UnsupportedSchemaVersion {
            found: current_version,
            expected: SCHEMA_VERSION,
        });
    }

    if current_version == 0 {
        conn.execute_batch(SCHEMA_V1)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
        tracing::debug!("Initialized index schema at version {}", SCHEMA_VERSION);
    } else if current_version < SCHEMA_VERSION {
        for version in (current_version + 1)..=SCHEMA_VERSION {
            migrate_to_version(conn, version)?;
        }
    }

    Ok(())
}

/// Apply migration for a specific version.
fn migrate_to_version(conn: &Connection, version: i32) -> Result<(), StateError> {
    match version {
        1 => conn.execute_batch(SCHEMA_V1)?,
        other => {
            tracing::warn!("No migration step for schema version {}", other);
        }
    }
    set_schema_version(conn, version)?;
    tracing::info!("Migrated index to schema version {}", version);
    Ok(())
}
