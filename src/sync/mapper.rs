//! Remote descriptor → index record, and index record ↔ disk.

use std::collections::BTreeSet;

use chrono::Utc;

use crate::remote::RemoteAsset;
use crate::state::AssetRecord;
use crate::versions::VersionId;

/// Build the record to store for `remote`.
///
/// Identity, metadata and `available_versions` come from the remote; the
/// downloaded/failed sets carry over from `existing`. A location the remote
/// stopped reporting is kept.
pub(crate) fn merge(existing: Option<&AssetRecord>, remote: &RemoteAsset) -> AssetRecord {
    let (downloaded, failed, prior_location) = match existing {
        Some(record) => (
            record.downloaded_versions.clone(),
            record.failed_versions.clone(),
            record.location,
        ),
        None => (BTreeSet::new(), BTreeSet::new(), None),
    };

    AssetRecord {
        asset_id: remote.id.clone(),
        filename: remote.filename.clone(),
        remote_metadata: remote.metadata.clone(),
        available_versions: remote.renditions.keys().copied().collect(),
        downloaded_versions: downloaded,
        failed_versions: failed,
        created_at: remote.created,
        added_at: remote.added,
        last_sync_at: existing.map_or_else(Utc::now, |r| r.last_sync_at),
        location: remote.location.or(prior_location),
        width: remote.width,
        height: remote.height,
        asset_kind: remote.kind,
    }
}

/// Difference between what the index recorded and what is on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Reconciled {
    pub downloaded: BTreeSet<VersionId>,
    /// Recorded as downloaded but the file is gone.
    pub dropped: BTreeSet<VersionId>,
    /// Complete on disk but never recorded.
    pub adopted: BTreeSet<VersionId>,
}

impl Reconciled {
    pub fn has_drift(&self) -> bool {
        !self.dropped.is_empty() || !self.adopted.is_empty()
    }
}

/// Disk is the truth for `downloaded_versions`.
pub(crate) fn reconcile(record: &AssetRecord, on_disk: &BTreeSet<VersionId>) -> Reconciled {
    Reconciled {
        downloaded: on_disk.clone(),
        dropped: record
            .downloaded_versions
            .difference(on_disk)
            .copied()
            .collect(),
        adopted: on_disk
            .difference(&record.downloaded_versions)
            .copied()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AssetKind, Location};
    use serde_json::json;

    fn remote() -> RemoteAsset {
        let mut asset = RemoteAsset::new("A1", "IMG_0001.HEIC", AssetKind::Photo)
            .with_rendition(VersionId::Original, "https://x/o", "heic")
            .with_rendition(VersionId::Adjusted, "https://x/a", "jpg");
        asset.width = Some(10);
        asset.metadata = json!({"v": 2});
        asset
    }

    fn set(items: &[VersionId]) -> BTreeSet<VersionId> {
        items.iter().copied().collect()
    }

    #[test]
    fn test_merge_new_asset() {
        let record = merge(None, &remote());
        assert_eq!(record.asset_id, "A1");
        assert_eq!(
            record.available_versions,
            set(&[VersionId::Original, VersionId::Adjusted])
        );
        assert!(record.downloaded_versions.is_empty());
        assert!(record.failed_versions.is_empty());
        assert_eq!(record.remote_metadata, json!({"v": 2}));
    }

    #[test]
    fn test_merge_keeps_status_and_overwrites_available() {
        let mut existing = AssetRecord::new("A1", "old.heic", AssetKind::Other);
        existing.available_versions = set(&[VersionId::Original, VersionId::Thumb]);
        existing.downloaded_versions = set(&[VersionId::Original, VersionId::Thumb]);
        existing.failed_versions = set(&[VersionId::Adjusted]);
        existing.location = Some(Location {
            latitude: 1.0,
            longitude: 2.0,
            altitude: None,
        });

        let merged = merge(Some(&existing), &remote());
        assert_eq!(merged.filename, "IMG_0001.HEIC");
        assert_eq!(merged.asset_kind, AssetKind::Photo);
        assert_eq!(
            merged.available_versions,
            set(&[VersionId::Original, VersionId::Adjusted])
        );
        assert_eq!(merged.downloaded_versions, existing.downloaded_versions);
        assert_eq!(merged.failed_versions, existing.failed_versions);
        assert_eq!(merged.location, existing.location);
        assert_eq!(merged.width, Some(10));
    }

    #[test]
    fn test_reconcile_drops_and_adopts() {
        let mut record = AssetRecord::new("A1", "x.heic", AssetKind::Photo);
        record.downloaded_versions = set(&[VersionId::Original, VersionId::Adjusted]);
        record.failed_versions = set(&[VersionId::LiveOriginal, VersionId::Alternative]);
        let on_disk = set(&[VersionId::Original, VersionId::LiveOriginal]);

        let r = reconcile(&record, &on_disk);
        assert_eq!(r.downloaded, on_disk);
        assert_eq!(r.dropped, set(&[VersionId::Adjusted]));
        assert_eq!(r.adopted, set(&[VersionId::LiveOriginal]));
        assert!(r.has_drift());
    }

    #[test]
    fn test_reconcile_no_drift() {
        let mut record = AssetRecord::new("A1", "x.heic", AssetKind::Photo);
        record.downloaded_versions = set(&[VersionId::Original]);
        let r = reconcile(&record, &set(&[VersionId::Original]));
        assert!(!r.has_drift());
        assert_eq!(r.downloaded, record.downloaded_versions);
    }
}
