//! icloudpd-mirror command line: `sync`, `status` and `verify`.

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use icloudpd_mirror::cli::{self, Command};
use icloudpd_mirror::config::{expand_tilde, Config};
use icloudpd_mirror::remote::{manifest, HttpByteStreamProvider};
use icloudpd_mirror::shutdown;
use icloudpd_mirror::state::{AssetIndex, SqliteAssetIndex, INDEX_FILENAME};
use icloudpd_mirror::store::FileStore;
use icloudpd_mirror::sync::{self, SyncEngine};

/// Open an existing index for reporting, or explain that there is none.
async fn open_existing_index(directory: &Path) -> anyhow::Result<Option<SqliteAssetIndex>> {
    let db_path = directory.join(INDEX_FILENAME);
    if !db_path.exists() {
        println!("No asset index found at {}", db_path.display());
        println!("Run a sync first to create it.");
        return Ok(None);
    }
    Ok(Some(SqliteAssetIndex::open(&db_path).await?))
}

async fn run_status(args: cli::StatusArgs) -> anyhow::Result<()> {
    let directory = expand_tilde(&args.directory);
    let Some(index) = open_existing_index(&directory).await? else {
        return Ok(());
    };
    let summary = index.summary().await?;

    println!("Asset index: {}", index.path().display());
    println!();
    println!("Assets:");
    println!("  Total:            {}", summary.total_assets);
    println!("  Fully downloaded: {}", summary.fully_downloaded);
    println!("  With failures:    {}", summary.with_failures);
    println!();

    if let Some(started) = &summary.last_sync_started {
        println!(
            "Last sync started:   {}",
            started.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    if let Some(completed) = &summary.last_sync_completed {
        println!(
            "Last sync completed: {}",
            completed.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    if let Some(run) = &summary.last_run {
        println!(
            "Last run: {} assets seen, {} downloaded, {} failed{}{}",
            run.assets_seen,
            run.renditions_downloaded,
            run.renditions_failed,
            if run.interrupted { ", interrupted" } else { "" },
            if run.aborted { ", aborted" } else { "" },
        );
    }

    if args.failed && summary.with_failures > 0 {
        println!();
        println!("Failed renditions:");
        for record in index.failed_assets().await? {
            let versions: Vec<&str> = record.failed_versions.iter().map(|v| v.as_str()).collect();
            println!(
                "  {} ({}) - {}",
                record.filename,
                record.asset_id,
                versions.join(", ")
            );
        }
    }

    Ok(())
}

async fn run_verify(args: cli::VerifyArgs) -> anyhow::Result<()> {
    let directory = expand_tilde(&args.directory);
    let Some(index) = open_existing_index(&directory).await? else {
        return Ok(());
    };
    let store = FileStore::open(&directory).await?;

    println!("Verifying {}...", store.data_dir().display());
    let report = sync::verify(&index, &store).await?;

    for key in &report.missing {
        println!("  MISSING: {}", key);
    }
    for key in &report.orphans {
        println!("  UNRECORDED: {}", key);
    }
    for name in &report.unrecognized {
        println!("  UNKNOWN FILE: {}", name);
    }

    println!();
    println!("Results:");
    println!("  Verified:   {}", report.verified);
    println!("  Missing:    {}", report.missing.len());
    println!("  Unrecorded: {}", report.orphans.len());
    println!("  Unknown:    {}", report.unrecognized.len());

    if !report.is_clean() {
        println!();
        println!("The next sync pass re-downloads missing renditions and adopts unrecorded ones.");
        std::process::exit(1);
    }

    Ok(())
}

async fn run_sync(args: cli::SyncArgs) -> anyhow::Result<()> {
    let config = Config::from_cli(args)?;
    tracing::info!(
        concurrency = config.threads_num,
        directory = %config.directory.display(),
        "Starting icloudpd-mirror"
    );

    let provider = HttpByteStreamProvider::new(config.download_timeout)?;
    let engine = SyncEngine::open(&config.sync_config(), Arc::new(provider)).await?;
    let shutdown_token = shutdown::install_signal_handler()?;

    loop {
        if shutdown_token.is_cancelled() {
            tracing::info!("Shutdown requested, exiting...");
            break;
        }

        let assets = config.filter.apply(manifest::open(&config.manifest).await?);
        let outcome = engine.run_pass(assets, &shutdown_token).await;
        outcome.stats.log_summary();

        if let Some(e) = outcome.error {
            anyhow::bail!("Sync pass aborted: {}", e);
        }

        let Some(interval) = config.watch_with_interval else {
            if outcome.stats.renditions_failed > 0 {
                anyhow::bail!(
                    "{} downloads failed",
                    outcome.stats.renditions_failed
                );
            }
            break;
        };

        if outcome.stats.renditions_failed > 0 {
            tracing::warn!(
                "{} downloads failed, retrying on the next pass",
                outcome.stats.renditions_failed
            );
        }
        if shutdown_token.is_cancelled() {
            tracing::info!("Shutdown requested, exiting...");
            break;
        }
        tracing::info!("Waiting {} seconds...", interval.as_secs());
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_token.cancelled() => {
                tracing::info!("Shutdown during wait, exiting...");
                break;
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    match cli.command {
        Command::Sync(args) => run_sync(args).await,
        Command::Status(args) => run_status(args).await,
        Command::Verify(args) => run_verify(args).await,
    }
}
