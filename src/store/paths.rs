//! Rendition file naming inside the flat data directory.
//!
//! `{urlsafe_b64_nopad(asset_id)}-{version}.{extension}`. The encoded id never
//! contains `.` and version tokens never contain `-`, so a name splits back
//! unambiguously at the last `-` of its stem.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::versions::VersionId;

/// Suffix of in-progress downloads.
pub const TEMP_SUFFIX: &str = ".tmp";

const FALLBACK_EXTENSION: &str = "bin";

/// Filesystem-safe encoding of a remote asset id.
pub fn encode_asset_id(asset_id: &str) -> String {
    URL_SAFE_NO_PAD.encode(asset_id.as_bytes())
}

/// Lower-case and keep only ASCII letters and digits; `bin` when nothing
/// is left. The input is remote-derived and may contain separators.
pub fn normalize_extension(extension: &str) -> String {
    let ext: String = extension
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if ext.is_empty() {
        FALLBACK_EXTENSION.to_string()
    } else {
        ext
    }
}

/// File name for one rendition.
pub fn rendition_file_name(asset_id: &str, version: VersionId, extension: &str) -> String {
    format!(
        "{}-{}.{}",
        encode_asset_id(asset_id),
        version,
        normalize_extension(extension)
    )
}

/// Prefix shared by every rendition file of an asset.
pub(crate) fn rendition_prefix(asset_id: &str) -> String {
    format!("{}-", encode_asset_id(asset_id))
}

/// Strip the extension from a completed rendition file name.
/// `None` for temp files and names without an extension.
fn completed_stem(file_name: &str) -> Option<&str> {
    if file_name.ends_with(TEMP_SUFFIX) {
        return None;
    }
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(stem)
}

/// Version token of a file belonging to the asset whose prefix is given.
/// The remainder of the stem must be exactly a version token, which rules
/// out files of other assets whose encoded id merely starts the same way.
pub(crate) fn version_for_prefix(file_name: &str, prefix: &str) -> Option<VersionId> {
    let rest = completed_stem(file_name)?.strip_prefix(prefix)?;
    rest.parse().ok()
}

/// Reverse of [`rendition_file_name`]: recover `(asset_id, version)`.
pub fn decode_file_name(file_name: &str) -> Option<(String, VersionId)> {
    let stem = completed_stem(file_name)?;
    let (encoded, version) = stem.rsplit_once('-')?;
    let version: VersionId = version.parse().ok()?;
    let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    let asset_id = String::from_utf8(bytes).ok()?;
    Some((asset_id, version))
}

/// `path` with `.tmp` appended to the full file name.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}
