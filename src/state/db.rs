//! Asset index trait and SQLite implementation.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::error::StateError;
use super::schema;
use super::types::{AssetKind, AssetRecord, IndexSummary, Location, SyncRunStats};
use crate::versions::VersionId;

/// Durable mapping from asset id to [`AssetRecord`].
///
/// This trait is object-safe and can be used with `Arc<dyn AssetIndex>` for
/// shared access across async tasks. Every method either completes its write
/// or returns an error; nothing is dropped silently.
#[async_trait]
pub trait AssetIndex: Send + Sync {
    /// Look up a record by asset id.
    async fn get(&self, asset_id: &str) -> Result<Option<AssetRecord>, StateError>;

    /// Insert a record or fully replace the existing one.
    ///
    /// No merging happens here; callers merge before calling. `last_sync_at`
    /// is set to the time of the write.
    async fn upsert(&self, record: &AssetRecord) -> Result<(), StateError>;

    /// Replace only the downloaded/failed sets and `last_sync_at`.
    ///
    /// Anything in `failed` that is also in `downloaded` is dropped so the
    /// two sets stay disjoint. Fails with [`StateError::NotFound`] for an
    /// unknown asset.
    async fn update_download_status(
        &self,
        asset_id: &str,
        downloaded: &BTreeSet<VersionId>,
        failed: &BTreeSet<VersionId>,
        at: DateTime<Utc>,
    ) -> Result<(), StateError>;

    /// Number of assets in the index.
    async fn count(&self) -> Result<u64, StateError>;

    /// Number of assets whose downloaded set equals their (non-empty)
    /// available set.
    async fn count_fully_downloaded(&self) -> Result<u64, StateError>;

    /// Records with at least one available rendition not yet downloaded.
    async fn assets_needing_download(&self) -> Result<Vec<AssetRecord>, StateError>;

    /// Records whose last attempt left failed renditions.
    async fn failed_assets(&self) -> Result<Vec<AssetRecord>, StateError>;

    /// Every record, ordered by asset id.
    async fn all_records(&self) -> Result<Vec<AssetRecord>, StateError>;

    /// Start a new sync run and return its ID.
    async fn start_sync_run(&self) -> Result<i64, StateError>;

    /// Complete a sync run with statistics.
    async fn complete_sync_run(&self, run_id: i64, stats: &SyncRunStats)
        -> Result<(), StateError>;

    /// Get a summary of the index state.
    async fn summary(&self) -> Result<IndexSummary, StateError>;
}

const SELECT_COLUMNS: &str = "SELECT asset_id, filename, asset_kind, created_at, added_at, width, height, \
     location_latitude, location_longitude, location_altitude, available_versions, \
     downloaded_versions, failed_versions, last_sync_at, remote_metadata FROM photo_assets";

/// SQLite implementation of the asset index.
pub struct SqliteAssetIndex {
    /// Wrapped in Mutex because rusqlite::Connection is not Sync. The lock
    /// also serializes writes, so two updates to one asset never interleave.
    conn: Mutex<Connection>,
    /// Path to the database file (for error messages).
    path: PathBuf,
}

impl std::fmt::Debug for SqliteAssetIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteAssetIndex")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteAssetIndex {
    /// Open or create an index at the given path.
    pub async fn open(path: &Path) -> Result<Self, StateError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path_clone).map_err(|e| StateError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            // WAL keeps readers off the writer's back; NORMAL sync is still
            // crash-safe in WAL mode.
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StateError::Migration)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StateError::Migration)?;

            schema::migrate(&conn)?;

            Ok::<_, StateError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an in-memory index.
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().map_err(|e| StateError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    /// Get the path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StateError> {
        self.conn
            .lock()
            .map_err(|e| StateError::Query(e.to_string()))
    }

    fn query_records(&self, filter: &str) -> Result<Vec<AssetRecord>, StateError> {
        let conn = self.lock()?;
        let sql = format!("{SELECT_COLUMNS} {filter} ORDER BY asset_id");
        let mut stmt = conn.prepare(&sql).map_err(StateError::query)?;

        let rows = stmt
            .query_map([], RawRow::from_row)
            .map_err(StateError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StateError::query)?;

        rows.into_iter().map(RawRow::into_record).collect()
    }
}

#[async_trait]
impl AssetIndex for SqliteAssetIndex {
    async fn get(&self, asset_id: &str) -> Result<Option<AssetRecord>, StateError> {
        let raw = {
            let conn = self.lock()?;
            conn.query_row(
                &format!("{SELECT_COLUMNS} WHERE asset_id = ?1"),
                [asset_id],
                RawRow::from_row,
            )
            .optional()
            .map_err(StateError::query)?
        };

        raw.map(RawRow::into_record).transpose()
    }

    async fn upsert(&self, record: &AssetRecord) -> Result<(), StateError> {
        let last_sync_at = Utc::now().timestamp();
        let available = encode_versions(&record.available_versions)?;
        let downloaded = encode_versions(&record.downloaded_versions)?;
        let failed = encode_versions(&record.failed_versions)?;
        let metadata = serde_json::to_string(&record.remote_metadata)
            .map_err(|e| StateError::Query(e.to_string()))?;

        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO photo_assets (
                asset_id, filename, asset_kind, created_at, added_at, width, height,
                location_latitude, location_longitude, location_altitude,
                available_versions, downloaded_versions, failed_versions,
                last_sync_at, remote_metadata
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(asset_id) DO UPDATE SET
                filename = excluded.filename,
                asset_kind = excluded.asset_kind,
                created_at = excluded.created_at,
                added_at = excluded.added_at,
                width = excluded.width,
                height = excluded.height,
                location_latitude = excluded.location_latitude,
                location_longitude = excluded.location_longitude,
                location_altitude = excluded.location_altitude,
                available_versions = excluded.available_versions,
                downloaded_versions = excluded.downloaded_versions,
                failed_versions = excluded.failed_versions,
                last_sync_at = excluded.last_sync_at,
                remote_metadata = excluded.remote_metadata
            "#,
            rusqlite::params![
                &record.asset_id,
                &record.filename,
                record.asset_kind.as_str(),
                record.created_at.map(|dt| dt.timestamp()),
                record.added_at.map(|dt| dt.timestamp()),
                record.width,
                record.height,
                record.location.map(|l| l.latitude),
                record.location.map(|l| l.longitude),
                record.location.and_then(|l| l.altitude),
                available,
                downloaded,
                failed,
                last_sync_at,
                metadata,
            ],
        )
        .map_err(StateError::query)?;

        Ok(())
    }

    async fn update_download_status(
        &self,
        asset_id: &str,
        downloaded: &BTreeSet<VersionId>,
        failed: &BTreeSet<VersionId>,
        at: DateTime<Utc>,
    ) -> Result<(), StateError> {
        let failed: BTreeSet<VersionId> = failed.difference(downloaded).copied().collect();
        let downloaded_json = encode_versions(downloaded)?;
        let failed_json = encode_versions(&failed)?;

        let conn = self.lock()?;
        let rows = conn
            .execute(
                "UPDATE photo_assets SET downloaded_versions = ?1, failed_versions = ?2, last_sync_at = ?3 WHERE asset_id = ?4",
                rusqlite::params![downloaded_json, failed_json, at.timestamp(), asset_id],
            )
            .map_err(StateError::query)?;

        if rows == 0 {
            return Err(StateError::NotFound(asset_id.to_string()));
        }
        Ok(())
    }

    async fn count(&self) -> Result<u64, StateError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM photo_assets", [], |row| row.get(0))
            .map_err(StateError::query)?;
        Ok(count as u64)
    }

    async fn count_fully_downloaded(&self) -> Result<u64, StateError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT asset_id, available_versions, downloaded_versions FROM photo_assets",
            )
            .map_err(StateError::query)?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(StateError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StateError::query)?;

        let mut full = 0u64;
        for (asset_id, available, downloaded) in rows {
            let available = decode_versions(&asset_id, "available_versions", &available)?;
            let downloaded = decode_versions(&asset_id, "downloaded_versions", &downloaded)?;
            if !available.is_empty() && available == downloaded {
                full += 1;
            }
        }
        Ok(full)
    }

    async fn assets_needing_download(&self) -> Result<Vec<AssetRecord>, StateError> {
        let records = self.query_records("")?;
        Ok(records.into_iter().filter(AssetRecord::needs_download).collect())
    }

    async fn failed_assets(&self) -> Result<Vec<AssetRecord>, StateError> {
        let records = self.query_records("WHERE failed_versions != '[]'")?;
        Ok(records
            .into_iter()
            .filter(|r| !r.failed_versions.is_empty())
            .collect())
    }

    async fn all_records(&self) -> Result<Vec<AssetRecord>, StateError> {
        self.query_records("")
    }

    async fn start_sync_run(&self) -> Result<i64, StateError> {
        let started_at = Utc::now().timestamp();

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_runs (started_at) VALUES (?1)",
            [started_at],
        )
        .map_err(StateError::query)?;

        Ok(conn.last_insert_rowid())
    }

    async fn complete_sync_run(
        &self,
        run_id: i64,
        stats: &SyncRunStats,
    ) -> Result<(), StateError> {
        let completed_at = Utc::now().timestamp();

        let conn = self.lock()?;
        conn.execute(
            "UPDATE sync_runs SET completed_at = ?1, assets_seen = ?2, renditions_downloaded = ?3, \
             renditions_failed = ?4, bytes_downloaded = ?5, asset_errors = ?6, interrupted = ?7, \
             aborted = ?8 WHERE id = ?9",
            rusqlite::params![
                completed_at,
                stats.assets_seen as i64,
                stats.renditions_downloaded as i64,
                stats.renditions_failed as i64,
                stats.bytes_downloaded as i64,
                stats.asset_errors as i64,
                stats.interrupted,
                stats.aborted,
                run_id
            ],
        )
        .map_err(StateError::query)?;

        Ok(())
    }

    async fn summary(&self) -> Result<IndexSummary, StateError> {
        let total_assets = self.count().await?;
        let fully_downloaded = self.count_fully_downloaded().await?;
        let with_failures = self.failed_assets().await?.len() as u64;

        type RunRow = (i64, Option<i64>, i64, i64, i64, i64, i64, bool, bool);
        let last_run: Option<RunRow> = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT started_at, completed_at, assets_seen, renditions_downloaded, renditions_failed, \
                 bytes_downloaded, asset_errors, interrupted, aborted FROM sync_runs ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                    ))
                },
            )
            .optional()
            .map_err(StateError::query)?
        };

        let (last_sync_started, last_sync_completed, last_run) = match last_run {
            Some((started, completed, seen, downloaded, failed, bytes, errors, interrupted, aborted)) => (
                Utc.timestamp_opt(started, 0).single(),
                completed.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
                completed.map(|_| SyncRunStats {
                    assets_seen: seen as u64,
                    renditions_downloaded: downloaded as u64,
                    renditions_failed: failed as u64,
                    bytes_downloaded: bytes as u64,
                    asset_errors: errors as u64,
                    interrupted,
                    aborted,
                }),
            ),
            None => (None, None, None),
        };

        Ok(IndexSummary {
            total_assets,
            fully_downloaded,
            with_failures,
            last_sync_started,
            last_sync_completed,
            last_run,
        })
    }
}

fn encode_versions(set: &BTreeSet<VersionId>) -> Result<String, StateError> {
    serde_json::to_string(set).map_err(|e| StateError::Query(e.to_string()))
}

fn decode_versions(
    asset_id: &str,
    field: &'static str,
    json: &str,
) -> Result<BTreeSet<VersionId>, StateError> {
    serde_json::from_str(json).map_err(|e| StateError::corrupt(asset_id, field, e))
}

fn decode_timestamp(
    asset_id: &str,
    field: &'static str,
    ts: i64,
) -> Result<DateTime<Utc>, StateError> {
    Utc.timestamp_opt(ts, 0)
        .single()
        .ok_or_else(|| StateError::corrupt(asset_id, field, format!("invalid timestamp {ts}")))
}

/// Column values as stored, before validation.
struct RawRow {
    asset_id: String,
    filename: String,
    asset_kind: String,
    created_at: Option<i64>,
    added_at: Option<i64>,
    width: Option<i64>,
    height: Option<i64>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    altitude: Option<f64>,
    available: String,
    downloaded: String,
    failed: String,
    last_sync_at: i64,
    remote_metadata: String,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            asset_id: row.get(0)?,
            filename: row.get(1)?,
            asset_kind: row.get(2)?,
            created_at: row.get(3)?,
            added_at: row.get(4)?,
            width: row.get(5)?,
            height: row.get(6)?,
            latitude: row.get(7)?,
            longitude: row.get(8)?,
            altitude: row.get(9)?,
            available: row.get(10)?,
            downloaded: row.get(11)?,
            failed: row.get(12)?,
            last_sync_at: row.get(13)?,
            remote_metadata: row.get(14)?,
        })
    }

    /// Validate every field; anything malformed fails closed.
    fn into_record(self) -> Result<AssetRecord, StateError> {
        let id = self.asset_id.as_str();

        let asset_kind = AssetKind::from_db_str(&self.asset_kind).ok_or_else(|| {
            StateError::corrupt(id, "asset_kind", format!("unknown kind '{}'", self.asset_kind))
        })?;
        let dimension = |field: &'static str, v: Option<i64>| {
            v.map(|v| u32::try_from(v).map_err(|e| StateError::corrupt(id, field, e)))
                .transpose()
        };
        let location = match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(Location {
                latitude,
                longitude,
                altitude: self.altitude,
            }),
            (None, None) => None,
            (lat, _) => {
                let missing = if lat.is_some() { "longitude" } else { "latitude" };
                return Err(StateError::corrupt(
                    id,
                    "location",
                    format!("{missing} missing"),
                ));
            }
        };

        Ok(AssetRecord {
            filename: self.filename,
            remote_metadata: serde_json::from_str(&self.remote_metadata)
                .map_err(|e| StateError::corrupt(id, "remote_metadata", e))?,
            available_versions: decode_versions(id, "available_versions", &self.available)?,
            downloaded_versions: decode_versions(id, "downloaded_versions", &self.downloaded)?,
            failed_versions: decode_versions(id, "failed_versions", &self.failed)?,
            created_at: self
                .created_at
                .map(|ts| decode_timestamp(id, "created_at", ts))
                .transpose()?,
            added_at: self
                .added_at
                .map(|ts| decode_timestamp(id, "added_at", ts))
                .transpose()?,
            last_sync_at: decode_timestamp(id, "last_sync_at", self.last_sync_at)?,
            location,
            width: dimension("width", self.width)?,
            height: dimension("height", self.height)?,
            asset_kind,
            asset_id: self.asset_id,
        })
    }
}
