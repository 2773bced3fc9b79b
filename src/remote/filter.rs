//! Enumeration strategies applied to an asset stream before a pass.
//!
//! Errors from the source are passed through untouched so the engine can
//! count them.

use chrono::{DateTime, Utc};
use futures_util::future;
use futures_util::stream::{self, StreamExt};

use super::AssetStream;

/// Which slice of the remote enumeration to sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumerationFilter {
    /// Only the first N items of the enumeration.
    pub recent: Option<usize>,
    /// Only assets created on or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Stop once this many assets made it through the other filters.
    pub until_found: Option<usize>,
}

impl EnumerationFilter {
    pub fn is_noop(&self) -> bool {
        self.recent.is_none() && self.since.is_none() && self.until_found.is_none()
    }

    /// Apply `recent`, then `since`, then `until_found`.
    pub fn apply(&self, assets: AssetStream) -> AssetStream {
        let mut assets = assets;
        if let Some(n) = self.recent {
            assets = recent(assets, n);
        }
        if let Some(date) = self.since {
            assets = since(assets, date);
        }
        if let Some(n) = self.until_found {
            assets = until_found(assets, n);
        }
        assets
    }
}

/// First `n` items of the enumeration, errors included.
pub fn recent(assets: AssetStream, n: usize) -> AssetStream {
    assets.take(n).boxed()
}

/// Drop assets created before `date`. Assets without a creation date pass.
pub fn since(assets: AssetStream, date: DateTime<Utc>) -> AssetStream {
    assets
        .filter(move |item| {
            let keep = match item {
                Ok(asset) => asset.created.map_or(true, |created| created >= date),
                Err(_) => true,
            };
            future::ready(keep)
        })
        .boxed()
}

/// End the stream after `n` assets; nothing more is pulled from upstream.
pub fn until_found(assets: AssetStream, n: usize) -> AssetStream {
    stream::unfold((assets, 0usize), move |(mut assets, found)| async move {
        if found >= n {
            return None;
        }
        let item = assets.next().await?;
        let found = if item.is_ok() { found + 1 } else { found };
        Some((item, (assets, found)))
    })
    .boxed()
}
