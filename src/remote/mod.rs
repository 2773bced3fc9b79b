//! Collaborator interfaces consumed by the sync engine, plus the concrete
//! adapters shipped with the binary.
//!
//! The engine only sees two capabilities: a stream of [`RemoteAsset`]
//! descriptors and a [`ByteStreamProvider`] that turns a
//! [`RenditionLocator`] into bytes. Authentication, pagination and URL
//! refresh live behind those seams.

pub mod cloudkit;
pub mod filter;
pub mod http;
pub mod manifest;

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;

use crate::state::{AssetKind, Location};
use crate::versions::VersionId;

pub use http::HttpByteStreamProvider;

/// Where one rendition can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenditionLocator {
    pub url: String,
    /// File extension without the leading dot.
    pub extension: String,
    pub size: Option<u64>,
    pub checksum: Option<String>,
}

/// One asset as reported by the remote.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteAsset {
    pub id: String,
    pub filename: String,
    pub kind: AssetKind,
    pub created: Option<DateTime<Utc>>,
    pub added: Option<DateTime<Utc>>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub location: Option<Location>,
    pub renditions: BTreeMap<VersionId, RenditionLocator>,
    /// Raw records, stored verbatim in the index.
    pub metadata: Value,
}

impl RemoteAsset {
    pub fn new(id: impl Into<String>, filename: impl Into<String>, kind: AssetKind) -> Self {
        Self {
            id: id.into(),
            filename: filename.into(),
            kind,
            created: None,
            added: None,
            width: None,
            height: None,
            location: None,
            renditions: BTreeMap::new(),
            metadata: Value::Null,
        }
    }

    /// Builder-style helper used by adapters and tests.
    pub fn with_rendition(
        mut self,
        version: VersionId,
        url: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        self.renditions.insert(
            version,
            RenditionLocator {
                url: url.into(),
                extension: extension.into(),
                size: None,
                checksum: None,
            },
        );
        self
    }
}

impl std::fmt::Display for RemoteAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<RemoteAsset: id={}>", self.id)
    }
}

/// Failure while fetching rendition bytes. Always worth retrying.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Stream interrupted: {0}")]
    Interrupted(String),
}

/// Failure to produce one asset descriptor. Skips that asset only.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Malformed record at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("Failed to read asset source: {0}")]
    Io(#[from] std::io::Error),
}

/// Body of one rendition, chunk by chunk.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Enumerates remote assets in the order the remote returns them.
pub type AssetStream = BoxStream<'static, Result<RemoteAsset, SourceError>>;

/// Opens a byte stream for a rendition.
#[async_trait]
pub trait ByteStreamProvider: Send + Sync {
    async fn open(&self, locator: &RenditionLocator) -> Result<ByteStream, TransportError>;
}
