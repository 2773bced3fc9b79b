//! Rendition files under `{base}/_data/`.
//!
//! Every file is written to a `.tmp` sibling, flushed, synced and renamed
//! into place, so a final path is either absent or complete. Leftover temp
//! files from an interrupted run are removed by [`FileStore::cleanup_incomplete`].

pub mod paths;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::remote::{ByteStream, TransportError};
use crate::versions::VersionId;

pub use paths::{decode_file_name, encode_asset_id, rendition_file_name, TEMP_SUFFIX};

/// Data directory name, relative to the sync base directory.
pub const DATA_DIRECTORY: &str = "_data";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to create data directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to scan data directory {path}: {source}")]
    Scan {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The byte source failed mid-transfer.
    #[error(transparent)]
    Source(#[from] TransportError),
}

/// Versions on disk per asset id, captured by [`FileStore::inventory`].
#[derive(Debug, Default, Clone)]
pub struct DiskInventory {
    by_asset: HashMap<String, BTreeSet<VersionId>>,
    /// Completed files whose names do not decode to a rendition.
    unrecognized: Vec<String>,
}

impl DiskInventory {
    pub fn versions_of(&self, asset_id: &str) -> BTreeSet<VersionId> {
        self.by_asset.get(asset_id).cloned().unwrap_or_default()
    }

    /// Note a file written after the scan.
    pub fn record(&mut self, asset_id: &str, version: VersionId) {
        self.by_asset
            .entry(asset_id.to_string())
            .or_default()
            .insert(version);
    }

    pub fn asset_ids(&self) -> impl Iterator<Item = &str> {
        self.by_asset.keys().map(String::as_str)
    }

    pub fn unrecognized(&self) -> &[String] {
        &self.unrecognized
    }

    pub fn file_count(&self) -> usize {
        self.by_asset.values().map(BTreeSet::len).sum()
    }
}

/// Placement and existence checks for rendition files.
#[derive(Debug, Clone)]
pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    /// Open the store under `base`, creating `base/_data` if needed.
    pub async fn open(base: &Path) -> Result<Self, StoreError> {
        let data_dir = base.join(DATA_DIRECTORY);
        fs::create_dir_all(&data_dir)
            .await
            .map_err(|e| StoreError::CreateDir {
                path: data_dir.clone(),
                source: e,
            })?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Final path of a rendition. Pure; nothing is touched on disk.
    pub fn path_for(&self, asset_id: &str, version: VersionId, extension: &str) -> PathBuf {
        self.data_dir
            .join(rendition_file_name(asset_id, version, extension))
    }

    pub async fn exists(&self, asset_id: &str, version: VersionId, extension: &str) -> bool {
        fs::try_exists(self.path_for(asset_id, version, extension))
            .await
            .unwrap_or(false)
    }

    /// Stream `source` into `path` through a `.tmp` sibling. Returns the
    /// number of bytes written. On any error the temp file is removed and
    /// `path` is left untouched.
    pub async fn write_from_stream(
        &self,
        path: &Path,
        source: ByteStream,
    ) -> Result<u64, StoreError> {
        let temp = paths::temp_path_for(path);
        match write_temp(&temp, source).await {
            Ok(bytes) => {
                fs::rename(&temp, path)
                    .await
                    .map_err(|e| StoreError::Write {
                        path: path.to_path_buf(),
                        source: e,
                    })
                    .inspect_err(|_| discard_temp(&temp))?;
                Ok(bytes)
            }
            Err(e) => {
                discard_temp(&temp);
                Err(e)
            }
        }
    }

    /// Versions of `asset_id` with a completed file on disk.
    pub async fn list_existing_versions(
        &self,
        asset_id: &str,
    ) -> Result<BTreeSet<VersionId>, StoreError> {
        let prefix = paths::rendition_prefix(asset_id);
        let mut versions = BTreeSet::new();
        for name in self.file_names().await? {
            if let Some(version) = paths::version_for_prefix(&name, &prefix) {
                versions.insert(version);
            }
        }
        Ok(versions)
    }

    /// One directory scan mapping every asset id to its on-disk versions.
    pub async fn inventory(&self) -> Result<DiskInventory, StoreError> {
        let mut inventory = DiskInventory::default();
        for name in self.file_names().await? {
            if name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            match decode_file_name(&name) {
                Some((asset_id, version)) => inventory.record(&asset_id, version),
                None => inventory.unrecognized.push(name),
            }
        }
        Ok(inventory)
    }

    /// Remove leftover `.tmp` files. Returns how many were removed.
    pub async fn cleanup_incomplete(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        for name in self.file_names().await? {
            if !name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            let path = self.data_dir.join(&name);
            match fs::remove_file(&path).await {
                Ok(()) => {
                    tracing::debug!("Removed incomplete download {}", path.display());
                    removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::Remove { path, source: e }),
            }
        }
        Ok(removed)
    }

    /// Total bytes of completed rendition files.
    pub async fn disk_usage(&self) -> Result<u64, StoreError> {
        let mut total = 0u64;
        let mut entries = self.read_dir().await?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| self.scan_error(e))? {
            if entry.file_name().to_string_lossy().ends_with(TEMP_SUFFIX) {
                continue;
            }
            let meta = entry.metadata().await.map_err(|e| self.scan_error(e))?;
            if meta.is_file() {
                total += meta.len();
            }
        }
        Ok(total)
    }

    async fn read_dir(&self) -> Result<fs::ReadDir, StoreError> {
        fs::read_dir(&self.data_dir)
            .await
            .map_err(|e| self.scan_error(e))
    }

    async fn file_names(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let mut entries = self.read_dir().await?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| self.scan_error(e))? {
            // Non-UTF-8 names are never ours.
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        Ok(names)
    }

    fn scan_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Scan {
            path: self.data_dir.clone(),
            source,
        }
    }
}

async fn write_temp(temp: &Path, mut source: ByteStream) -> Result<u64, StoreError> {
    let write_err = |e: std::io::Error| StoreError::Write {
        path: temp.to_path_buf(),
        source: e,
    };

    let mut file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(temp)
        .await
        .map_err(write_err)?;

    let mut bytes_written: u64 = 0;
    while let Some(chunk) = source.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await.map_err(write_err)?;
        bytes_written += chunk.len() as u64;
    }
    file.flush().await.map_err(write_err)?;
    file.sync_all().await.map_err(write_err)?;
    Ok(bytes_written)
}

fn discard_temp(temp: &Path) {
    if let Err(e) = std::fs::remove_file(temp) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Could not remove {}: {}", temp.display(), e);
        }
    }
}
