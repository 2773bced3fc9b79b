use thiserror::Error;

use crate::remote::TransportError;
use crate::store::StoreError;
use crate::versions::VersionId;

/// Typed per-rendition download errors enabling retry classification.
///
/// `is_retryable()` separates transient remote failures from permanent ones
/// (no locator, local disk failures) so the retry loop can stop early.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("No download location for {asset_id} {version}")]
    NoLocator { asset_id: String, version: VersionId },

    /// Opening the rendition failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The byte stream broke off mid-transfer.
    #[error("Transfer interrupted: {0}")]
    Source(TransportError),

    #[error("Disk error: {0}")]
    Disk(StoreError),

    #[error("Giving up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl From<StoreError> for DownloadError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Source(source) => Self::Source(source),
            other => Self::Disk(other),
        }
    }
}

impl DownloadError {
    /// Whether this error is transient and worth retrying.
    ///
    /// Any non-2xx status is retried: CDN URLs for renditions fail
    /// intermittently with 4xx as well as 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Transport(_) | DownloadError::Source(_) => true,
            DownloadError::NoLocator { .. }
            | DownloadError::Disk(_)
            | DownloadError::RetriesExhausted { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn status(code: u16) -> DownloadError {
        DownloadError::Transport(TransportError::Status {
            status: code,
            url: "https://example.com/x".into(),
        })
    }

    #[test]
    fn test_http_statuses_retryable() {
        for code in [404, 403, 429, 500, 503] {
            assert!(status(code).is_retryable(), "status {code}");
        }
    }

    #[test]
    fn test_no_locator_not_retryable() {
        let e = DownloadError::NoLocator {
            asset_id: "A1".into(),
            version: VersionId::Original,
        };
        assert!(!e.is_retryable());
        assert_eq!(e.to_string(), "No download location for A1 original");
    }

    #[test]
    fn test_store_source_error_becomes_retryable() {
        let e: DownloadError =
            StoreError::Source(TransportError::Interrupted("reset".into())).into();
        assert!(matches!(e, DownloadError::Source(_)));
        assert!(e.is_retryable());
    }

    #[test]
    fn test_disk_not_retryable() {
        let e: DownloadError = StoreError::Write {
            path: PathBuf::from("/x"),
            source: std::io::Error::other("disk full"),
        }
        .into();
        assert!(matches!(e, DownloadError::Disk(_)));
        assert!(!e.is_retryable());
    }

    #[test]
    fn test_exhausted_not_retryable() {
        let e = DownloadError::RetriesExhausted {
            attempts: 3,
            last_error: "HTTP status 500".into(),
        };
        assert!(!e.is_retryable());
    }
}
