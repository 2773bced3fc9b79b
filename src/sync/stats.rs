use std::time::Duration;

use crate::state::SyncRunStats;

/// Counters for one sync pass. Not persisted as-is; a subset lands in the
/// index's run history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatistics {
    pub assets_seen: u64,
    /// Assets with at least one rendition to fetch.
    pub assets_with_pending: u64,
    pub renditions_downloaded: u64,
    pub renditions_failed: u64,
    pub bytes_downloaded: u64,
    /// Per-asset errors that were logged and skipped.
    pub asset_errors: u64,
    /// `.tmp` files removed before processing.
    pub incomplete_cleaned: usize,

    pub total_assets: u64,
    pub fully_downloaded_assets: u64,
    pub bytes_on_disk: u64,

    pub interrupted: bool,
    pub elapsed: Duration,
}

impl SyncStatistics {
    pub fn to_run_stats(&self, aborted: bool) -> SyncRunStats {
        SyncRunStats {
            assets_seen: self.assets_seen,
            renditions_downloaded: self.renditions_downloaded,
            renditions_failed: self.renditions_failed,
            bytes_downloaded: self.bytes_downloaded,
            asset_errors: self.asset_errors,
            interrupted: self.interrupted,
            aborted,
        }
    }

    /// Emit the summary block through `tracing`.
    pub fn log_summary(&self) {
        for line in self.to_string().lines() {
            tracing::info!("{}", line);
        }
    }
}

impl std::fmt::Display for SyncStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "── Summary ──")?;
        if self.interrupted {
            writeln!(f, "  Interrupted before the end of the enumeration")?;
        }
        writeln!(
            f,
            "  {} assets seen, {} with pending renditions, {} skipped on error",
            self.assets_seen, self.assets_with_pending, self.asset_errors
        )?;
        writeln!(
            f,
            "  {} downloaded ({}), {} failed",
            self.renditions_downloaded,
            format_bytes(self.bytes_downloaded),
            self.renditions_failed
        )?;
        if self.incomplete_cleaned > 0 {
            writeln!(
                f,
                "  {} incomplete downloads cleaned up",
                self.incomplete_cleaned
            )?;
        }
        writeln!(
            f,
            "  index: {} assets, {} fully downloaded, {} on disk",
            self.total_assets,
            self.fully_downloaded_assets,
            format_bytes(self.bytes_on_disk)
        )?;
        write!(f, "  elapsed: {}", format_duration(self.elapsed))
    }
}

pub(crate) fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0s");
        assert_eq!(format_duration(Duration::from_secs(59)), "59s");
        assert_eq!(format_duration(Duration::from_secs(754)), "12m 34s");
        assert_eq!(format_duration(Duration::from_secs(5025)), "1h 23m 45s");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.0 GiB");
    }

    #[test]
    fn test_run_stats_carry_counters() {
        let stats = SyncStatistics {
            assets_seen: 4,
            renditions_downloaded: 3,
            renditions_failed: 1,
            bytes_downloaded: 99,
            asset_errors: 2,
            interrupted: true,
            ..Default::default()
        };
        let run = stats.to_run_stats(false);
        assert_eq!(run.assets_seen, 4);
        assert_eq!(run.renditions_failed, 1);
        assert_eq!(run.asset_errors, 2);
        assert!(run.interrupted);
        assert!(!run.aborted);
    }

    #[test]
    fn test_display_mentions_interruption_only_when_set() {
        let mut stats = SyncStatistics::default();
        assert!(!stats.to_string().contains("Interrupted"));
        stats.interrupted = true;
        let text = stats.to_string();
        assert!(text.starts_with("── Summary ──"));
        assert!(text.contains("Interrupted"));
        assert!(text.ends_with("elapsed: 0s"));
    }
}
