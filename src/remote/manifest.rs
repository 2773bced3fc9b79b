//! JSON-lines manifest of CloudKit record pairs.
//!
//! Each non-blank line is `{"master": {...}, "asset": {...}}`, as captured
//! from a `CPLAssetAndMasterByAddedDate` query. Malformed lines surface as
//! [`SourceError::Malformed`] items so only that asset is skipped.

use std::path::Path;

use anyhow::Context;
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

use super::cloudkit::CloudKitRecord;
use super::{AssetStream, RemoteAsset, SourceError};

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    master: Value,
    #[serde(default)]
    asset: Value,
}

/// Parse one manifest line. `line_no` is 1-based and only used in errors.
pub fn parse_line(line_no: usize, line: &str) -> Result<RemoteAsset, SourceError> {
    let entry: ManifestEntry = serde_json::from_str(line).map_err(|e| SourceError::Malformed {
        line: line_no,
        reason: e.to_string(),
    })?;
    if !entry.master.is_object() {
        return Err(SourceError::Malformed {
            line: line_no,
            reason: "\"master\" is not an object".to_string(),
        });
    }
    Ok(CloudKitRecord::new(entry.master, entry.asset).into_remote_asset())
}

struct ReadState {
    lines: Option<Lines<BufReader<File>>>,
    line_no: usize,
}

/// Open a manifest file and stream its assets in file order.
pub async fn open(path: &Path) -> anyhow::Result<AssetStream> {
    let file = File::open(path)
        .await
        .with_context(|| format!("Failed to open manifest {}", path.display()))?;
    tracing::debug!("Reading manifest {}", path.display());

    let state = ReadState {
        lines: Some(BufReader::new(file).lines()),
        line_no: 0,
    };

    let stream = stream::unfold(state, |mut state| async move {
        let lines = state.lines.as_mut()?;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    state.line_no += 1;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let item = parse_line(state.line_no, &line);
                    return Some((item, state));
                }
                Ok(None) => return None,
                Err(e) => {
                    // A read error ends the manifest.
                    state.lines = None;
                    return Some((Err(SourceError::Io(e)), state));
                }
            }
        }
    });
    Ok(stream.boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::versions::VersionId;

    const GOOD: &str = r#"{"master": {"recordName": "M1", "fields": {"filenameEnc": {"value": "a.jpg", "type": "STRING"}, "itemType": {"value": "public.jpeg"}, "resOriginalRes": {"value": {"downloadURL": "https://example.com/a"}}, "resOriginalFileType": {"value": "public.jpeg"}}}, "asset": {"fields": {}}}"#;

    #[test]
    fn test_parse_line() {
        let asset = parse_line(1, GOOD).unwrap();
        assert_eq!(asset.id, "M1");
        assert_eq!(asset.filename, "a.jpg");
        assert!(asset.renditions.contains_key(&VersionId::Original));
    }

    #[test]
    fn test_parse_line_malformed() {
        assert!(matches!(
            parse_line(7, "{not json"),
            Err(SourceError::Malformed { line: 7, .. })
        ));
        assert!(matches!(
            parse_line(2, r#"{"master": 3}"#),
            Err(SourceError::Malformed { line: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_open_streams_in_order_and_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.jsonl");
        let second = GOOD.replace("M1", "M2");
        std::fs::write(&path, format!("{GOOD}\n\n{{oops\n{second}\n")).unwrap();

        let items: Vec<_> = open(&path).await.unwrap().collect().await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap().id, "M1");
        assert!(matches!(items[1], Err(SourceError::Malformed { line: 3, .. })));
        assert_eq!(items[2].as_ref().unwrap().id, "M2");
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(open(&dir.path().join("absent.jsonl")).await.is_err());
    }
}
