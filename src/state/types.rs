//! Types for the asset index.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::versions::VersionId;

/// Broad media kind of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Photo,
    Video,
    Other,
}

impl AssetKind {
    /// Convert to the string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Other => "other",
        }
    }

    /// Parse from the string stored in the database.
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "photo" => Some(Self::Photo),
            "video" => Some(Self::Video),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Geographic position reported for an asset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
}

/// The index entry for one remote asset.
///
/// `available_versions` always mirrors the remote's latest report.
/// `downloaded_versions` and `failed_versions` are only changed through
/// [`AssetIndex::update_download_status`](super::AssetIndex::update_download_status)
/// and are disjoint at rest.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetRecord {
    /// Remote-assigned identifier (CloudKit `recordName`).
    pub asset_id: String,
    /// Original remote filename, used only to derive an extension.
    pub filename: String,
    pub remote_metadata: Value,

    pub available_versions: BTreeSet<VersionId>,
    pub downloaded_versions: BTreeSet<VersionId>,
    pub failed_versions: BTreeSet<VersionId>,

    pub created_at: Option<DateTime<Utc>>,
    pub added_at: Option<DateTime<Utc>>,
    /// When the index last wrote this record.
    pub last_sync_at: DateTime<Utc>,

    pub location: Option<Location>,
    pub width: Option<u32>,
    pub height: Option<u32>,

    pub asset_kind: AssetKind,
}

impl AssetRecord {
    /// Create a record for an asset seen for the first time.
    pub fn new(asset_id: impl Into<String>, filename: impl Into<String>, kind: AssetKind) -> Self {
        Self {
            asset_id: asset_id.into(),
            filename: filename.into(),
            remote_metadata: Value::Null,
            available_versions: BTreeSet::new(),
            downloaded_versions: BTreeSet::new(),
            failed_versions: BTreeSet::new(),
            created_at: None,
            added_at: None,
            last_sync_at: Utc::now(),
            location: None,
            width: None,
            height: None,
            asset_kind: kind,
        }
    }

    /// Every available rendition is on disk.
    pub fn is_fully_downloaded(&self) -> bool {
        !self.available_versions.is_empty() && self.downloaded_versions == self.available_versions
    }

    /// Some available rendition is not on disk yet.
    pub fn needs_download(&self) -> bool {
        !self.available_versions.is_subset(&self.downloaded_versions)
    }
}

/// Counters persisted for one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRunStats {
    pub assets_seen: u64,
    pub renditions_downloaded: u64,
    pub renditions_failed: u64,
    pub bytes_downloaded: u64,
    pub asset_errors: u64,
    /// Stopped early by a shutdown request.
    pub interrupted: bool,
    /// Stopped early by a fatal storage error.
    pub aborted: bool,
}

/// Snapshot of the index for status reporting.
#[derive(Debug, Clone)]
pub struct IndexSummary {
    pub total_assets: u64,
    pub fully_downloaded: u64,
    /// Assets with at least one rendition that failed on its last attempt.
    pub with_failures: u64,
    pub last_sync_started: Option<DateTime<Utc>>,
    pub last_sync_completed: Option<DateTime<Utc>>,
    pub last_run: Option<SyncRunStats>,
}
