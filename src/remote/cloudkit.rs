//! Mapping of CloudKit `CPLMaster` / `CPLAsset` record pairs into
//! [`RemoteAsset`] descriptors.

use std::collections::BTreeMap;

use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use super::{RemoteAsset, RenditionLocator};
use crate::state::{AssetKind, Location};
use crate::versions::VersionId;

/// Rendition field prefixes for photos. `{prefix}Res` holds the resource,
/// `{prefix}FileType` its UTI.
pub(crate) const PHOTO_VERSION_LOOKUP: &[(VersionId, &str)] = &[
    (VersionId::Original, "resOriginal"),
    (VersionId::Alternative, "resOriginalAlt"),
    (VersionId::Medium, "resJPEGMed"),
    (VersionId::Thumb, "resJPEGThumb"),
    (VersionId::Adjusted, "resJPEGFull"),
    (VersionId::LiveOriginal, "resOriginalVidCompl"),
    (VersionId::LiveMedium, "resVidMed"),
    (VersionId::LiveThumb, "resVidSmall"),
];

pub(crate) const VIDEO_VERSION_LOOKUP: &[(VersionId, &str)] = &[
    (VersionId::Original, "resOriginal"),
    (VersionId::Medium, "resVidMed"),
    (VersionId::Thumb, "resVidSmall"),
];

/// Classify a CloudKit `itemType` UTI.
pub(crate) fn kind_from_uti(uti: &str) -> Option<AssetKind> {
    match uti {
        "public.heic"
        | "public.heif"
        | "public.jpeg"
        | "public.png"
        | "public.tiff"
        | "com.compuserve.gif"
        | "com.adobe.raw-image"
        | "com.canon.cr2-raw-image"
        | "com.canon.crw-raw-image"
        | "com.sony.arw-raw-image"
        | "com.fuji.raw-image"
        | "com.panasonic.rw2-raw-image"
        | "com.nikon.nrw-raw-image"
        | "com.pentax.raw-image"
        | "com.nikon.raw-image"
        | "com.olympus.raw-image"
        | "com.canon.cr3-raw-image"
        | "com.olympus.or-raw-image" => Some(AssetKind::Photo),
        "com.apple.quicktime-movie" | "public.mpeg-4" => Some(AssetKind::Video),
        _ => None,
    }
}

/// File extension for a rendition UTI.
pub(crate) fn extension_from_uti(uti: &str) -> Option<&'static str> {
    let ext = match uti {
        "public.heic" => "heic",
        "public.heif" => "heif",
        "public.jpeg" => "jpg",
        "public.png" => "png",
        "public.tiff" => "tiff",
        "com.compuserve.gif" => "gif",
        "com.adobe.raw-image" => "dng",
        "com.canon.cr2-raw-image" => "cr2",
        "com.canon.crw-raw-image" => "crw",
        "com.canon.cr3-raw-image" => "cr3",
        "com.sony.arw-raw-image" => "arw",
        "com.fuji.raw-image" => "raf",
        "com.panasonic.rw2-raw-image" => "rw2",
        "com.nikon.nrw-raw-image" => "nrw",
        "com.nikon.raw-image" => "nef",
        "com.pentax.raw-image" => "pef",
        "com.olympus.raw-image" => "orf",
        "com.olympus.or-raw-image" => "ori",
        "com.apple.quicktime-movie" => "mov",
        "public.mpeg-4" => "mp4",
        _ => return None,
    };
    Some(ext)
}

fn filename_extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// A CloudKit master/asset record pair.
#[derive(Debug, Clone)]
pub struct CloudKitRecord {
    master_record: Value,
    asset_record: Value,
}

impl CloudKitRecord {
    pub fn new(master_record: Value, asset_record: Value) -> Self {
        Self {
            master_record,
            asset_record,
        }
    }

    /// The unique record name from the master record. Empty when absent.
    pub fn id(&self) -> &str {
        self.master_record["recordName"].as_str().unwrap_or_else(|| {
            tracing::warn!("Missing expected field: recordName");
            ""
        })
    }

    /// Decode the filename from the `filenameEnc` field.
    pub fn filename(&self) -> Option<String> {
        let enc = &self.master_record["fields"]["filenameEnc"];
        if enc.is_null() {
            return None;
        }
        let value = enc["value"].as_str()?;
        match enc["type"].as_str().unwrap_or("STRING") {
            "STRING" => Some(value.to_string()),
            "ENCRYPTED_BYTES" => {
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(value)
                    .ok()?;
                String::from_utf8(decoded).ok()
            }
            other => {
                tracing::warn!("Unsupported filenameEnc type: {}", other);
                None
            }
        }
    }

    fn field(&self, name: &str) -> &Value {
        let asset_field = &self.asset_record["fields"][name];
        if asset_field.is_null() {
            &self.master_record["fields"][name]
        } else {
            asset_field
        }
    }

    fn millis_field(&self, name: &str) -> Option<DateTime<Utc>> {
        self.field(name)["value"]
            .as_f64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms as i64).single())
    }

    /// When the photo/video was taken.
    pub fn asset_date(&self) -> Option<DateTime<Utc>> {
        self.millis_field("assetDate")
    }

    /// When the asset was added to the library.
    pub fn added_date(&self) -> Option<DateTime<Utc>> {
        self.millis_field("addedDate")
    }

    /// Media kind from `itemType`, falling back to the filename extension.
    pub fn kind(&self) -> AssetKind {
        if let Some(kind) = self.master_record["fields"]["itemType"]["value"]
            .as_str()
            .and_then(kind_from_uti)
        {
            return kind;
        }
        match self
            .filename()
            .as_deref()
            .and_then(filename_extension)
            .as_deref()
        {
            Some("heic" | "heif" | "png" | "jpg" | "jpeg" | "gif" | "tiff" | "dng") => {
                AssetKind::Photo
            }
            Some("mov" | "mp4" | "m4v") => AssetKind::Video,
            _ => AssetKind::Other,
        }
    }

    fn dimensions(&self) -> (Option<u32>, Option<u32>) {
        let dim = |name: &str| {
            self.field(name)["value"]
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
        };
        (dim("resOriginalWidth"), dim("resOriginalHeight"))
    }

    fn location(&self) -> Option<Location> {
        let coord = |name: &str| self.field(name)["value"].as_f64();
        Some(Location {
            latitude: coord("locationLatitude")?,
            longitude: coord("locationLongitude")?,
            altitude: coord("locationAltitude"),
        })
    }

    /// Available renditions keyed by version.
    pub fn renditions(&self, kind: AssetKind) -> BTreeMap<VersionId, RenditionLocator> {
        let lookup = if kind == AssetKind::Video {
            VIDEO_VERSION_LOOKUP
        } else {
            PHOTO_VERSION_LOOKUP
        };
        let fallback_ext = self.filename().as_deref().and_then(filename_extension);

        let mut renditions = BTreeMap::new();
        for (version, prefix) in lookup {
            let res_entry = &self.field(&format!("{prefix}Res"))["value"];
            if res_entry.is_null() {
                continue;
            }

            let url = res_entry["downloadURL"].as_str().unwrap_or_else(|| {
                tracing::warn!("Missing expected field: {prefix}Res.downloadURL");
                ""
            });
            let uti = self.field(&format!("{prefix}FileType"))["value"].as_str();
            let extension = uti
                .and_then(extension_from_uti)
                .map(str::to_string)
                .or_else(|| fallback_ext.clone())
                .unwrap_or_default();

            renditions.insert(
                *version,
                RenditionLocator {
                    url: url.to_string(),
                    extension,
                    size: res_entry["size"].as_u64(),
                    checksum: res_entry["fileChecksum"].as_str().map(str::to_string),
                },
            );
        }
        renditions
    }

    /// Build the engine-facing descriptor. The raw records are kept as
    /// `{"master": …, "asset": …}`.
    pub fn into_remote_asset(self) -> RemoteAsset {
        let kind = self.kind();
        let filename = self.filename().unwrap_or_default();
        let (width, height) = self.dimensions();

        RemoteAsset {
            id: self.id().to_string(),
            kind,
            created: self.asset_date(),
            added: self.added_date(),
            width,
            height,
            location: self.location(),
            renditions: self.renditions(kind),
            filename,
            metadata: json!({
                "master": self.master_record,
                "asset": self.asset_record,
            }),
        }
    }
}

impl std::fmt::Display for CloudKitRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<CloudKitRecord: id={}>", self.id())
    }
}
