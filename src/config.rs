use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Utc};

use crate::cli::SyncArgs;
use crate::remote::filter::EnumerationFilter;
use crate::retry::RetryConfig;
use crate::sync::SyncConfig;
use crate::versions::VersionPolicy;

/// Backoff never grows past this.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Validated settings for the `sync` command.
#[derive(Debug, Clone)]
pub struct Config {
    pub directory: PathBuf,
    pub manifest: PathBuf,
    pub policy: VersionPolicy,
    pub filter: EnumerationFilter,

    pub retry: RetryConfig,
    pub download_timeout: Duration,
    pub watch_with_interval: Option<Duration>,

    pub threads_num: usize,
    pub no_progress_bar: bool,
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_cli(cli: SyncArgs) -> anyhow::Result<Self> {
        if cli.directory.trim().is_empty() {
            anyhow::bail!("--directory must not be empty");
        }
        if cli.threads_num == 0 {
            anyhow::bail!("--threads-num must be at least 1");
        }
        if cli.max_retries == 0 {
            anyhow::bail!("--max-retries must be at least 1");
        }
        if cli.download_timeout == 0 {
            anyhow::bail!("--download-timeout must be at least 1 second");
        }

        let policy = if cli.versions.is_empty() {
            VersionPolicy::default()
        } else {
            VersionPolicy::parse(&cli.versions)?
        };

        let since = cli
            .since
            .as_deref()
            .map(parse_date_or_interval)
            .transpose()?
            .map(|d| d.with_timezone(&Utc));

        Ok(Self {
            directory: expand_tilde(&cli.directory),
            manifest: expand_tilde(&cli.manifest),
            policy,
            filter: EnumerationFilter {
                recent: cli.recent,
                since,
                until_found: cli.until_found,
            },
            retry: RetryConfig {
                max_attempts: cli.max_retries,
                base_delay: Duration::from_secs(cli.retry_delay),
                max_delay: MAX_RETRY_DELAY.max(Duration::from_secs(cli.retry_delay)),
                ..RetryConfig::default()
            },
            download_timeout: Duration::from_secs(cli.download_timeout),
            watch_with_interval: cli.watch_with_interval.map(Duration::from_secs),
            threads_num: cli.threads_num,
            no_progress_bar: cli.no_progress_bar,
        })
    }

    /// Engine-facing subset.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            directory: self.directory.clone(),
            policy: self.policy.clone(),
            concurrency: self.threads_num,
            retry: self.retry,
            download_timeout: self.download_timeout,
            no_progress_bar: self.no_progress_bar,
        }
    }
}

/// Parse a human-friendly date string into a concrete timestamp.
///
/// - Relative interval: `"20d"` (20 days ago from now)
/// - ISO date: `"2025-01-02"` (midnight local time)
/// - ISO datetime: `"2025-01-02T14:30:00"` (local time)
pub(crate) fn parse_date_or_interval(s: &str) -> anyhow::Result<DateTime<Local>> {
    if let Some(days_str) = s.strip_suffix('d') {
        if let Ok(days) = days_str.parse::<i64>() {
            return Ok(Local::now() - chrono::Duration::days(days));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive_dt) = date.and_hms_opt(0, 0, 0) {
            if let Some(dt) = naive_dt.and_local_timezone(Local).single() {
                return Ok(dt);
            }
        }
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        if let Some(local) = dt.and_local_timezone(Local).single() {
            return Ok(local);
        }
    }
    anyhow::bail!(
        "Cannot parse '{}' as a date. Expected ISO date (2025-01-02), \
         datetime (2025-01-02T14:30:00), or interval (20d)",
        s
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::versions::VersionId;

    #[test]
    fn test_expand_tilde_with_home() {
        let result = expand_tilde("~/Pictures");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(result, home.join("Pictures"));
        }
    }

    #[test]
    fn test_expand_tilde_no_prefix() {
        assert_eq!(expand_tilde("/absolute/path"), PathBuf::from("/absolute/path"));
        assert_eq!(expand_tilde("relative/path"), PathBuf::from("relative/path"));
    }

    #[test]
    fn test_parse_date_iso() {
        let dt = parse_date_or_interval("2025-01-15").unwrap();
        assert_eq!(dt.date_naive(), NaiveDate::from_ymd_opt(2025, 1, 15).unwrap());
    }

    #[test]
    fn test_parse_datetime_iso() {
        let dt = parse_date_or_interval("2025-06-15T14:30:00").unwrap();
        let naive = dt.naive_local();
        assert_eq!(naive.date(), NaiveDate::from_ymd_opt(2025, 6, 15).unwrap());
        assert_eq!(naive.time(), chrono::NaiveTime::from_hms_opt(14, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_interval_days() {
        let before = Local::now();
        let dt = parse_date_or_interval("10d").unwrap();
        let after = Local::now();
        assert!(dt >= before - chrono::Duration::days(10) - chrono::Duration::seconds(1));
        assert!(dt <= after - chrono::Duration::days(10) + chrono::Duration::seconds(1));
    }

    #[test]
    fn test_parse_invalid_date() {
        assert!(parse_date_or_interval("not-a-date").is_err());
        assert!(parse_date_or_interval("").is_err());
    }

    fn make_args(overrides: impl FnOnce(&mut SyncArgs)) -> SyncArgs {
        use clap::Parser;
        let cli = crate::cli::Cli::try_parse_from([
            "icloudpd-mirror",
            "sync",
            "-d",
            "/tmp/mirror",
            "-m",
            "/tmp/manifest.jsonl",
        ])
        .unwrap();
        let crate::cli::Command::Sync(mut args) = cli.command else {
            panic!("expected sync");
        };
        overrides(&mut args);
        args
    }

    #[test]
    fn test_from_cli_defaults() {
        let cfg = Config::from_cli(make_args(|_| {})).unwrap();
        assert_eq!(cfg.directory, PathBuf::from("/tmp/mirror"));
        assert_eq!(cfg.policy, VersionPolicy::default());
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.base_delay, Duration::from_secs(2));
        assert_eq!(cfg.download_timeout, Duration::from_secs(30));
        assert!(cfg.filter.is_noop());

        let sync = cfg.sync_config();
        assert_eq!(sync.concurrency, 5);
        assert_eq!(sync.directory, cfg.directory);
    }

    #[test]
    fn test_from_cli_policy_and_filters() {
        let cfg = Config::from_cli(make_args(|a| {
            a.versions = vec!["adjusted".into(), "original".into(), "adjusted".into()];
            a.recent = Some(10);
            a.since = Some("2025-01-02".into());
            a.until_found = Some(3);
        }))
        .unwrap();
        assert_eq!(
            cfg.policy.as_slice(),
            &[VersionId::Adjusted, VersionId::Original]
        );
        assert_eq!(cfg.filter.recent, Some(10));
        assert!(cfg.filter.since.is_some());
        assert_eq!(cfg.filter.until_found, Some(3));
    }

    #[test]
    fn test_from_cli_rejects_bad_values() {
        assert!(Config::from_cli(make_args(|a| a.versions = vec!["poster".into()])).is_err());
        assert!(Config::from_cli(make_args(|a| a.threads_num = 0)).is_err());
        assert!(Config::from_cli(make_args(|a| a.max_retries = 0)).is_err());
        assert!(Config::from_cli(make_args(|a| a.since = Some("yesterday".into()))).is_err());
    }
}
