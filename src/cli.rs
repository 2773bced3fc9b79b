use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "icloudpd-mirror",
    about = "Incrementally mirror an iCloud Photos library into a local directory"
)]
pub struct Cli {
    /// Log level (overridden by RUST_LOG)
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download every missing rendition listed by the asset source
    Sync(SyncArgs),
    /// Show what the asset index knows about the mirror
    Status(StatusArgs),
    /// Compare the asset index with the files on disk
    Verify(VerifyArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Local directory holding the index and the `_data` folder
    #[arg(short = 'd', long, env = "ICLOUDPD_MIRROR_DIRECTORY")]
    pub directory: String,

    /// JSON-lines file of CloudKit master/asset record pairs
    #[arg(short = 'm', long)]
    pub manifest: String,

    /// Rendition to mirror, in order of preference (repeatable).
    /// Defaults to original, live_original, adjusted, alternative.
    #[arg(long = "version", value_name = "VERSION")]
    pub versions: Vec<String>,

    /// Number of concurrent downloads
    #[arg(long, default_value_t = 5)]
    pub threads_num: usize,

    /// Download attempts per rendition before it is marked failed
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Base delay in seconds between attempts (doubles each retry)
    #[arg(long, default_value_t = 2)]
    pub retry_delay: u64,

    /// Connect and read timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub download_timeout: u64,

    /// Only consider the first N assets of the enumeration
    #[arg(long)]
    pub recent: Option<usize>,

    /// Only consider assets created on or after this ISO date, datetime or
    /// interval (e.g. 2025-01-02, 2025-01-02T14:30:00 or 20d)
    #[arg(long)]
    pub since: Option<String>,

    /// Stop after N assets have been considered
    #[arg(long)]
    pub until_found: Option<usize>,

    /// Run continuously, waiting N seconds between passes
    #[arg(long)]
    pub watch_with_interval: Option<u64>,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// Local mirror directory
    #[arg(short = 'd', long, env = "ICLOUDPD_MIRROR_DIRECTORY")]
    pub directory: String,

    /// List assets whose last download attempt failed
    #[arg(long)]
    pub failed: bool,
}

#[derive(Args, Debug, Clone)]
pub struct VerifyArgs {
    /// Local mirror directory
    #[arg(short = 'd', long, env = "ICLOUDPD_MIRROR_DIRECTORY")]
    pub directory: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
