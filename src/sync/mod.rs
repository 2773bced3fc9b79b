//! Sync engine: one pass over a remote enumeration, reconciling the asset
//! index with the data directory and fetching whatever is missing.
//!
//! Assets are processed one at a time in enumeration order; concurrency
//! exists only inside [`DownloadCoordinator::download_many`]. Per-asset
//! problems are logged and skipped. Index and store failures abort the
//! pass, which still reports the statistics gathered so far.

mod mapper;
pub mod stats;
pub mod verify;

use std::collections::BTreeSet;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use stats::SyncStatistics;
pub use verify::{verify, VerifyReport};

use crate::download::{DownloadCoordinator, DownloadItem, DEFAULT_CONCURRENCY};
use crate::remote::{AssetStream, ByteStreamProvider, RemoteAsset, SourceError};
use crate::retry::RetryConfig;
use crate::state::{AssetIndex, SqliteAssetIndex, StateError, INDEX_FILENAME};
use crate::store::{DiskInventory, FileStore, StoreError};
use crate::versions::VersionPolicy;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Asset index error: {0}")]
    State(#[from] StateError),

    #[error("File store error: {0}")]
    Store(#[from] StoreError),

    #[error("Asset source error: {0}")]
    Source(#[from] SourceError),

    #[error("Cannot map asset: {0}")]
    Mapping(String),
}

impl SyncError {
    /// Index and store errors end the pass; the rest skip one asset.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::State(_) | SyncError::Store(_))
    }
}

/// Lifecycle of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Idle,
    CleaningUp,
    Processing,
    Reporting,
    Done,
}

/// Statistics of a pass and, if it stopped early on a fatal error, why.
#[derive(Debug)]
pub struct PassOutcome {
    pub stats: SyncStatistics,
    pub error: Option<SyncError>,
}

impl PassOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Engine settings derived from the CLI.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base directory holding the index and `_data/`.
    pub directory: PathBuf,
    pub policy: VersionPolicy,
    pub concurrency: usize,
    pub retry: RetryConfig,
    pub download_timeout: Duration,
    pub no_progress_bar: bool,
}

impl SyncConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            policy: VersionPolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryConfig::default(),
            download_timeout: Duration::from_secs(30),
            no_progress_bar: true,
        }
    }
}

/// Create a progress bar ticking once per asset.
///
/// Returns `ProgressBar::hidden()` when the user passed `--no-progress-bar` or
/// stdout is not a TTY, so piped output and cron logs stay clean.
pub fn create_progress_bar(no_progress_bar: bool) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) =
        ProgressStyle::with_template("[{elapsed_precise}] {spinner} {pos} assets {msg}")
    {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(200));
    pb
}

pub struct SyncEngine {
    index: Arc<dyn AssetIndex>,
    store: Arc<FileStore>,
    coordinator: DownloadCoordinator,
    policy: VersionPolicy,
    no_progress_bar: bool,
}

impl SyncEngine {
    pub fn new(
        index: Arc<dyn AssetIndex>,
        store: Arc<FileStore>,
        coordinator: DownloadCoordinator,
        policy: VersionPolicy,
    ) -> Self {
        Self {
            index,
            store,
            coordinator,
            policy,
            no_progress_bar: true,
        }
    }

    /// Open the index and data directory under `config.directory`.
    pub async fn open(
        config: &SyncConfig,
        provider: Arc<dyn ByteStreamProvider>,
    ) -> Result<Self, SyncError> {
        let store = Arc::new(FileStore::open(&config.directory).await?);
        let index = SqliteAssetIndex::open(&config.directory.join(INDEX_FILENAME)).await?;
        let coordinator = DownloadCoordinator::new(
            provider,
            store.clone(),
            config.retry,
            config.concurrency,
        );
        Ok(Self::new(
            Arc::new(index),
            store,
            coordinator,
            config.policy.clone(),
        )
        .with_progress_bar(!config.no_progress_bar))
    }

    /// Show a progress bar during passes (only on a TTY).
    pub fn with_progress_bar(mut self, enabled: bool) -> Self {
        self.no_progress_bar = !enabled;
        self
    }

    pub fn index(&self) -> &Arc<dyn AssetIndex> {
        &self.index
    }

    pub fn store(&self) -> &Arc<FileStore> {
        &self.store
    }

    /// Run one pass over `assets`. Always returns statistics; `error` is set
    /// when an index or store failure cut the pass short.
    pub async fn run_pass(&self, assets: AssetStream, cancel: &CancellationToken) -> PassOutcome {
        let started = Instant::now();
        let mut stats = SyncStatistics::default();
        let mut state = PassState::Idle;

        // Run history is an index write like any other: failing to record
        // it aborts the pass.
        let run_id = match self.index.start_sync_run().await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("Could not record sync run: {}", e);
                stats.elapsed = started.elapsed();
                return PassOutcome {
                    stats,
                    error: Some(e.into()),
                };
            }
        };
        tracing::info!("Starting sync pass (policy {})", self.policy);
        let pb = create_progress_bar(self.no_progress_bar);

        let mut error = self
            .process(assets, cancel, &pb, &mut stats, &mut state)
            .await
            .err();
        pb.finish_and_clear();
        if let Some(e) = &error {
            tracing::error!("Sync pass aborted: {}", e);
        }

        transition(&mut state, PassState::Reporting);
        if let Err(e) = self.fill_totals(&mut stats).await {
            tracing::warn!("Could not gather final counts: {}", e);
            error.get_or_insert(e);
        }
        stats.elapsed = started.elapsed();

        let run_stats = stats.to_run_stats(error.is_some());
        if let Err(e) = self.index.complete_sync_run(run_id, &run_stats).await {
            tracing::error!("Could not record sync run completion: {}", e);
            error.get_or_insert(e.into());
        }

        transition(&mut state, PassState::Done);
        PassOutcome { stats, error }
    }

    async fn process(
        &self,
        mut assets: AssetStream,
        cancel: &CancellationToken,
        pb: &ProgressBar,
        stats: &mut SyncStatistics,
        state: &mut PassState,
    ) -> Result<(), SyncError> {
        transition(state, PassState::CleaningUp);
        stats.incomplete_cleaned = self.store.cleanup_incomplete().await?;
        if stats.incomplete_cleaned > 0 {
            tracing::info!(
                "Removed {} incomplete downloads from a previous run",
                stats.incomplete_cleaned
            );
        }
        let mut inventory = self.store.inventory().await?;

        transition(state, PassState::Processing);
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                item = assets.next() => Some(item),
            };
            let item = match item {
                None => {
                    pb.suspend(|| {
                        tracing::info!("Shutdown requested, stopping after current asset")
                    });
                    stats.interrupted = true;
                    break;
                }
                Some(None) => break,
                Some(Some(item)) => item,
            };

            let result = match item {
                Ok(remote) => {
                    stats.assets_seen += 1;
                    pb.set_message(remote.filename.clone());
                    self.process_asset(&remote, &mut inventory, pb, stats).await
                }
                Err(e) => Err(SyncError::Source(e)),
            };
            pb.inc(1);

            match result {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    stats.asset_errors += 1;
                    pb.suspend(|| tracing::error!("Skipping asset: {}", e));
                }
            }
        }
        Ok(())
    }

    async fn process_asset(
        &self,
        remote: &RemoteAsset,
        inventory: &mut DiskInventory,
        pb: &ProgressBar,
        stats: &mut SyncStatistics,
    ) -> Result<(), SyncError> {
        if remote.id.is_empty() {
            return Err(SyncError::Mapping(format!(
                "{} has no asset id",
                if remote.filename.is_empty() {
                    "record"
                } else {
                    remote.filename.as_str()
                }
            )));
        }
        let asset_id = remote.id.as_str();

        let existing = self.index.get(asset_id).await?;
        let record = mapper::merge(existing.as_ref(), remote);

        let reconciled = mapper::reconcile(&record, &inventory.versions_of(asset_id));
        if reconciled.has_drift() {
            pb.suspend(|| {
                tracing::warn!(
                    asset_id = %asset_id,
                    dropped = ?reconciled.dropped,
                    adopted = ?reconciled.adopted,
                    "Index disagrees with data directory, trusting disk",
                )
            });
        }

        self.index.upsert(&record).await?;

        let needed = self
            .policy
            .ordered_needed(&record.available_versions, &reconciled.downloaded);

        // Failures are replaced each pass: anything not retried now is no
        // longer failed.
        let mut downloaded = reconciled.downloaded.clone();
        let mut failed = BTreeSet::new();
        let ran = !needed.is_empty();

        if ran {
            stats.assets_with_pending += 1;
            tracing::debug!(asset_id = %asset_id, versions = ?needed, "Fetching renditions");

            let items = needed
                .iter()
                .map(|version| DownloadItem {
                    asset_id: asset_id.to_string(),
                    version: *version,
                    locator: remote.renditions.get(version).cloned(),
                    created_at: record.created_at,
                })
                .collect();

            for (key, result) in self.coordinator.download_many(items).await {
                match result {
                    Ok(report) => {
                        downloaded.insert(key.version);
                        inventory.record(asset_id, key.version);
                        stats.renditions_downloaded += 1;
                        stats.bytes_downloaded += report.bytes;
                    }
                    Err(_) => {
                        failed.insert(key.version);
                        stats.renditions_failed += 1;
                    }
                }
            }
        }

        if ran || downloaded != record.downloaded_versions || failed != record.failed_versions {
            self.index
                .update_download_status(asset_id, &downloaded, &failed, Utc::now())
                .await?;
        }
        Ok(())
    }

    async fn fill_totals(&self, stats: &mut SyncStatistics) -> Result<(), SyncError> {
        stats.total_assets = self.index.count().await?;
        stats.fully_downloaded_assets = self.index.count_fully_downloaded().await?;
        stats.bytes_on_disk = self.store.disk_usage().await?;
        Ok(())
    }
}

fn transition(state: &mut PassState, next: PassState) {
    tracing::debug!("Sync pass {:?} -> {:?}", state, next);
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{ByteStream, RenditionLocator, TransportError};
    use crate::state::{AssetKind, AssetRecord, IndexSummary, SyncRunStats};
    use crate::versions::VersionId;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::stream;

    struct StaticProvider;

    #[async_trait]
    impl ByteStreamProvider for StaticProvider {
        async fn open(&self, locator: &RenditionLocator) -> Result<ByteStream, TransportError> {
            let body = Bytes::from(locator.url.clone().into_bytes());
            Ok(stream::iter(vec![Ok(body)]).boxed())
        }
    }

    async fn engine() -> (tempfile::TempDir, SyncEngine) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SyncConfig::new(dir.path());
        config.retry = RetryConfig::immediate(1);
        let engine = SyncEngine::open(&config, Arc::new(StaticProvider))
            .await
            .unwrap();
        (dir, engine)
    }

    fn photo(id: &str) -> RemoteAsset {
        RemoteAsset::new(id, format!("{id}.heic"), AssetKind::Photo)
            .with_rendition(VersionId::Original, format!("https://x/{id}/o"), "heic")
    }

    fn assets(items: Vec<Result<RemoteAsset, SourceError>>) -> AssetStream {
        stream::iter(items).boxed()
    }

    #[test]
    fn test_fatal_classification() {
        assert!(SyncError::State(StateError::NotFound("x".into())).is_fatal());
        assert!(!SyncError::Mapping("x".into()).is_fatal());
        assert!(!SyncError::Source(SourceError::Malformed {
            line: 1,
            reason: "x".into()
        })
        .is_fatal());
    }

    #[test]
    fn test_progress_bar_hidden_when_disabled() {
        assert!(create_progress_bar(true).is_hidden());
    }

    #[tokio::test]
    async fn test_empty_enumeration() {
        let (_dir, engine) = engine().await;
        let outcome = engine
            .run_pass(assets(vec![]), &CancellationToken::new())
            .await;
        assert!(outcome.is_complete());
        assert_eq!(outcome.stats, SyncStatistics {
            elapsed: outcome.stats.elapsed,
            ..Default::default()
        });
    }

    #[tokio::test]
    async fn test_empty_id_is_skipped() {
        let (_dir, engine) = engine().await;
        let outcome = engine
            .run_pass(
                assets(vec![Ok(photo("")), Ok(photo("A2"))]),
                &CancellationToken::new(),
            )
            .await;
        assert!(outcome.is_complete());
        assert_eq!(outcome.stats.asset_errors, 1);
        assert_eq!(outcome.stats.assets_seen, 2);
        assert_eq!(outcome.stats.renditions_downloaded, 1);
        assert_eq!(engine.index().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_processes_nothing() {
        let (_dir, engine) = engine().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = engine.run_pass(assets(vec![Ok(photo("A1"))]), &cancel).await;
        assert!(outcome.is_complete());
        assert!(outcome.stats.interrupted);
        assert_eq!(outcome.stats.assets_seen, 0);

        let summary = engine.index().summary().await.unwrap();
        assert!(summary.last_run.unwrap().interrupted);
    }

    #[tokio::test]
    async fn test_missing_locator_records_failure() {
        let (_dir, engine) = engine().await;
        let asset = photo("A1").with_rendition(VersionId::Adjusted, "", "jpg");
        let outcome = engine
            .run_pass(assets(vec![Ok(asset)]), &CancellationToken::new())
            .await;
        assert_eq!(outcome.stats.renditions_downloaded, 1);
        assert_eq!(outcome.stats.renditions_failed, 1);

        let record = engine.index().get("A1").await.unwrap().unwrap();
        assert_eq!(record.failed_versions, BTreeSet::from([VersionId::Adjusted]));
        assert_eq!(record.downloaded_versions, BTreeSet::from([VersionId::Original]));
    }

    /// Delegates to an in-memory index, failing the chosen calls.
    #[derive(Default)]
    struct FlakyIndex {
        inner: Option<SqliteAssetIndex>,
        fail_upsert_for: Option<&'static str>,
        fail_start_run: bool,
        fail_complete_run: bool,
    }

    impl FlakyIndex {
        fn new() -> Self {
            Self {
                inner: Some(SqliteAssetIndex::open_in_memory().unwrap()),
                ..Default::default()
            }
        }

        fn inner(&self) -> &SqliteAssetIndex {
            self.inner.as_ref().unwrap()
        }

        fn injected(what: &str) -> StateError {
            StateError::Query(format!("injected failure: {what}"))
        }
    }

    #[async_trait]
    impl AssetIndex for FlakyIndex {
        async fn get(&self, asset_id: &str) -> Result<Option<AssetRecord>, StateError> {
            self.inner().get(asset_id).await
        }

        async fn upsert(&self, record: &AssetRecord) -> Result<(), StateError> {
            if self.fail_upsert_for == Some(record.asset_id.as_str()) {
                return Err(Self::injected("upsert"));
            }
            self.inner().upsert(record).await
        }

        async fn update_download_status(
            &self,
            asset_id: &str,
            downloaded: &BTreeSet<VersionId>,
            failed: &BTreeSet<VersionId>,
            at: chrono::DateTime<Utc>,
        ) -> Result<(), StateError> {
            self.inner()
                .update_download_status(asset_id, downloaded, failed, at)
                .await
        }

        async fn count(&self) -> Result<u64, StateError> {
            self.inner().count().await
        }

        async fn count_fully_downloaded(&self) -> Result<u64, StateError> {
            self.inner().count_fully_downloaded().await
        }

        async fn assets_needing_download(&self) -> Result<Vec<AssetRecord>, StateError> {
            self.inner().assets_needing_download().await
        }

        async fn failed_assets(&self) -> Result<Vec<AssetRecord>, StateError> {
            self.inner().failed_assets().await
        }

        async fn all_records(&self) -> Result<Vec<AssetRecord>, StateError> {
            self.inner().all_records().await
        }

        async fn start_sync_run(&self) -> Result<i64, StateError> {
            if self.fail_start_run {
                return Err(Self::injected("start_sync_run"));
            }
            self.inner().start_sync_run().await
        }

        async fn complete_sync_run(
            &self,
            run_id: i64,
            stats: &SyncRunStats,
        ) -> Result<(), StateError> {
            if self.fail_complete_run {
                return Err(Self::injected("complete_sync_run"));
            }
            self.inner().complete_sync_run(run_id, stats).await
        }

        async fn summary(&self) -> Result<IndexSummary, StateError> {
            self.inner().summary().await
        }
    }

    async fn engine_with(
        index: FlakyIndex,
        provider: Arc<dyn ByteStreamProvider>,
    ) -> (tempfile::TempDir, SyncEngine) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::open(dir.path()).await.unwrap());
        let coordinator =
            DownloadCoordinator::new(provider, store.clone(), RetryConfig::immediate(1), 2);
        let engine = SyncEngine::new(
            Arc::new(index),
            store,
            coordinator,
            VersionPolicy::default(),
        );
        (dir, engine)
    }

    #[tokio::test]
    async fn test_index_failure_aborts_pass_with_partial_stats() {
        let index = FlakyIndex {
            fail_upsert_for: Some("A2"),
            ..FlakyIndex::new()
        };
        let (_dir, engine) = engine_with(index, Arc::new(StaticProvider)).await;

        let outcome = engine
            .run_pass(
                assets(vec![Ok(photo("A1")), Ok(photo("A2")), Ok(photo("A3"))]),
                &CancellationToken::new(),
            )
            .await;

        assert!(!outcome.is_complete());
        assert!(matches!(outcome.error, Some(SyncError::State(_))));
        assert_eq!(outcome.stats.assets_seen, 2);
        assert_eq!(outcome.stats.renditions_downloaded, 1);
        assert_eq!(outcome.stats.asset_errors, 0);
        assert_eq!(outcome.stats.total_assets, 1);
        assert!(!outcome.stats.interrupted);

        let a1 = engine.index().get("A1").await.unwrap().unwrap();
        assert_eq!(a1.downloaded_versions, BTreeSet::from([VersionId::Original]));
        assert!(engine.index().get("A3").await.unwrap().is_none());

        let run = engine.index().summary().await.unwrap().last_run.unwrap();
        assert!(run.aborted);
        assert_eq!(run.assets_seen, 2);
    }

    #[tokio::test]
    async fn test_unrecorded_run_start_aborts_before_processing() {
        let index = FlakyIndex {
            fail_start_run: true,
            ..FlakyIndex::new()
        };
        let (_dir, engine) = engine_with(index, Arc::new(StaticProvider)).await;

        let outcome = engine
            .run_pass(assets(vec![Ok(photo("A1"))]), &CancellationToken::new())
            .await;
        assert!(matches!(outcome.error, Some(SyncError::State(_))));
        assert_eq!(outcome.stats.assets_seen, 0);
        assert_eq!(engine.index().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unrecorded_run_completion_is_reported() {
        let index = FlakyIndex {
            fail_complete_run: true,
            ..FlakyIndex::new()
        };
        let (_dir, engine) = engine_with(index, Arc::new(StaticProvider)).await;

        let outcome = engine
            .run_pass(assets(vec![Ok(photo("A1"))]), &CancellationToken::new())
            .await;
        assert!(matches!(outcome.error, Some(SyncError::State(_))));
        assert_eq!(outcome.stats.renditions_downloaded, 1);
    }

    /// Cancels the token as soon as the first rendition is requested.
    struct CancelOnOpen(CancellationToken);

    #[async_trait]
    impl ByteStreamProvider for CancelOnOpen {
        async fn open(&self, locator: &RenditionLocator) -> Result<ByteStream, TransportError> {
            self.0.cancel();
            StaticProvider.open(locator).await
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_pass_finishes_current_asset_only() {
        let cancel = CancellationToken::new();
        let provider = Arc::new(CancelOnOpen(cancel.clone()));
        let (_dir, engine) = engine_with(FlakyIndex::new(), provider).await;

        let pulled = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = pulled.clone();
        let a1 = photo("A1").with_rendition(VersionId::Adjusted, "https://x/A1/a", "jpg");
        let stream = assets(vec![Ok(a1), Ok(photo("A2"))])
            .inspect(move |_| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            })
            .boxed();

        let outcome = engine.run_pass(stream, &cancel).await;
        assert!(outcome.is_complete());
        assert!(outcome.stats.interrupted);
        assert_eq!(outcome.stats.assets_seen, 1);
        assert_eq!(outcome.stats.renditions_downloaded, 2);
        assert_eq!(pulled.load(std::sync::atomic::Ordering::SeqCst), 1);

        let a1 = engine.index().get("A1").await.unwrap().unwrap();
        assert_eq!(
            a1.downloaded_versions,
            BTreeSet::from([VersionId::Original, VersionId::Adjusted])
        );
        assert!(engine.index().get("A2").await.unwrap().is_none());
        assert!(engine.index().summary().await.unwrap().last_run.unwrap().interrupted);
    }
}
