//! Download coordinator: fetches renditions through a [`ByteStreamProvider`]
//! into the [`FileStore`] with bounded concurrency and per-item retries.

pub mod error;

use std::collections::HashMap;
use std::fs::FileTimes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};

pub use error::DownloadError;

use crate::remote::{ByteStreamProvider, RenditionLocator};
use crate::retry::{self, RetryAction, RetryConfig};
use crate::store::FileStore;
use crate::versions::VersionId;

/// Default number of renditions fetched at once.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Identity of one rendition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenditionKey {
    pub asset_id: String,
    pub version: VersionId,
}

impl std::fmt::Display for RenditionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.asset_id, self.version)
    }
}

/// A unit of work: one rendition of one asset.
#[derive(Debug, Clone)]
pub struct DownloadItem {
    pub asset_id: String,
    pub version: VersionId,
    pub locator: Option<RenditionLocator>,
    /// Applied to the file's mtime after a successful download.
    pub created_at: Option<DateTime<Utc>>,
}

impl DownloadItem {
    pub fn key(&self) -> RenditionKey {
        RenditionKey {
            asset_id: self.asset_id.clone(),
            version: self.version,
        }
    }
}

/// Outcome of a successful download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub path: PathBuf,
    pub bytes: u64,
    pub attempts: u32,
}

/// Results keyed by rendition, in no particular order.
pub type DownloadResults = HashMap<RenditionKey, Result<DownloadReport, DownloadError>>;

pub struct DownloadCoordinator {
    provider: Arc<dyn ByteStreamProvider>,
    store: Arc<FileStore>,
    retry: RetryConfig,
    concurrency: usize,
}

impl std::fmt::Debug for DownloadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadCoordinator")
            .field("store", &self.store)
            .field("retry", &self.retry)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl DownloadCoordinator {
    /// `concurrency` below one is raised to one.
    pub fn new(
        provider: Arc<dyn ByteStreamProvider>,
        store: Arc<FileStore>,
        retry: RetryConfig,
        concurrency: usize,
    ) -> Self {
        Self {
            provider,
            store,
            retry,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Download one rendition, retrying transient failures with backoff.
    pub async fn download(&self, item: &DownloadItem) -> Result<DownloadReport, DownloadError> {
        let locator = match &item.locator {
            Some(locator) if !locator.url.is_empty() => locator,
            _ => {
                return Err(DownloadError::NoLocator {
                    asset_id: item.asset_id.clone(),
                    version: item.version,
                })
            }
        };
        let path = self
            .store
            .path_for(&item.asset_id, item.version, &locator.extension);

        tracing::debug!(
            asset_id = %item.asset_id,
            version = %item.version,
            size_bytes = ?locator.size,
            path = %path.display(),
            "downloading",
        );

        let result = retry::retry_with_backoff(
            &self.retry,
            |e: &DownloadError| {
                if e.is_retryable() {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            |attempt| {
                let path = &path;
                async move {
                    let stream = self.provider.open(locator).await?;
                    let bytes = self.store.write_from_stream(path, stream).await?;
                    Ok::<_, DownloadError>((bytes, attempt + 1))
                }
            },
        )
        .await;

        let (bytes, attempts) = match result {
            Ok(done) => done,
            Err((e, attempts)) if e.is_retryable() => {
                return Err(DownloadError::RetriesExhausted {
                    attempts,
                    last_error: e.to_string(),
                })
            }
            Err((e, _)) => return Err(e),
        };

        if let Some(created_at) = item.created_at {
            let mtime_path = path.clone();
            let ts = created_at.timestamp();
            match tokio::task::spawn_blocking(move || set_file_mtime(&mtime_path, ts)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!("Could not set mtime on {}: {}", path.display(), e)
                }
                Err(e) => tracing::warn!("mtime task failed for {}: {}", path.display(), e),
            }
        }

        tracing::debug!("Downloaded {} ({} bytes)", path.display(), bytes);
        Ok(DownloadReport {
            path,
            bytes,
            attempts,
        })
    }

    /// Download every item with at most `concurrency` in flight. Each item
    /// retries independently; one failure never cancels the others.
    pub async fn download_many(&self, items: Vec<DownloadItem>) -> DownloadResults {
        stream::iter(items)
            .map(|item| async move {
                let result = self.download(&item).await;
                if let Err(e) = &result {
                    tracing::error!(
                        asset_id = %item.asset_id,
                        version = %item.version,
                        "Download failed: {}",
                        e
                    );
                }
                (item.key(), result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }
}

/// Set the modification and access times of a file to the given Unix
/// timestamp. Timestamps before 1970 are kept when the platform allows it
/// and clamped to the epoch otherwise.
fn set_file_mtime(path: &Path, timestamp: i64) -> std::io::Result<()> {
    let time = if timestamp >= 0 {
        UNIX_EPOCH + Duration::from_secs(timestamp as u64)
    } else {
        UNIX_EPOCH
            .checked_sub(Duration::from_secs(timestamp.unsigned_abs()))
            .unwrap_or(SystemTime::UNIX_EPOCH)
    };
    let times = FileTimes::new().set_modified(time).set_accessed(time);
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_times(times)?;
    Ok(())
}
