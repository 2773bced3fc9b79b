//! Offline consistency check between the asset index and `_data/`.

use std::collections::HashSet;

use crate::download::RenditionKey;
use crate::state::AssetIndex;
use crate::store::FileStore;

use super::SyncError;

/// Differences found by [`verify`]. Entries are sorted.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    /// Renditions recorded as downloaded and present on disk.
    pub verified: usize,
    /// Recorded as downloaded, no file on disk.
    pub missing: Vec<RenditionKey>,
    /// On disk, not recorded as downloaded.
    pub orphans: Vec<RenditionKey>,
    /// Files in `_data/` whose names are not rendition names.
    pub unrecognized: Vec<String>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.orphans.is_empty() && self.unrecognized.is_empty()
    }
}

/// Compare every record's `downloaded_versions` with the files on disk.
///
/// Read-only; the next sync pass repairs whatever drift this reports.
pub async fn verify(index: &dyn AssetIndex, store: &FileStore) -> Result<VerifyReport, SyncError> {
    let inventory = store.inventory().await?;
    let records = index.all_records().await?;
    let mut report = VerifyReport::default();

    let mut recorded = HashSet::new();
    for record in &records {
        let on_disk = inventory.versions_of(&record.asset_id);
        for version in &record.downloaded_versions {
            let key = RenditionKey {
                asset_id: record.asset_id.clone(),
                version: *version,
            };
            if on_disk.contains(version) {
                report.verified += 1;
            } else {
                report.missing.push(key.clone());
            }
            recorded.insert(key);
        }
    }

    for asset_id in inventory.asset_ids() {
        for version in inventory.versions_of(asset_id) {
            let key = RenditionKey {
                asset_id: asset_id.to_string(),
                version,
            };
            if !recorded.contains(&key) {
                report.orphans.push(key);
            }
        }
    }

    report.unrecognized = inventory.unrecognized().to_vec();
    report.missing.sort();
    report.orphans.sort();
    report.unrecognized.sort();
    Ok(report)
}
