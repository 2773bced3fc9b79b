use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;

use super::{ByteStream, ByteStreamProvider, RenditionLocator, TransportError};

const DEFAULT_USER_AGENT: &str = concat!("icloudpd-mirror/", env!("CARGO_PKG_VERSION"));

/// Streams rendition bodies over HTTP(S).
///
/// One instance is created per process and shared by every download through
/// an `Arc`; reqwest pools connections internally.
#[derive(Debug, Clone)]
pub struct HttpByteStreamProvider {
    client: Client,
}

impl HttpByteStreamProvider {
    /// Build a client whose connect and read timeouts are both `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));

        let client = Client::builder()
            .default_headers(default_headers)
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client, e.g. one carrying an authenticated session.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ByteStreamProvider for HttpByteStreamProvider {
    async fn open(&self, locator: &RenditionLocator) -> Result<ByteStream, TransportError> {
        let url = locator.url.clone();
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TransportError::Request {
                url: url.clone(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let content_length = response.content_length();
        tracing::debug!(url = %url, ?content_length, "Opened rendition stream");

        let stream = response.bytes_stream().map(move |chunk| {
            chunk.map_err(|e| TransportError::Request {
                url: url.clone(),
                source: e,
            })
        });
        Ok(stream.boxed())
    }
}
