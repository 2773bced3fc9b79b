//! Rendition identifiers and the version-selection policy.
//!
//! [`resolve`] is the pure diff between what the remote offers, what is
//! already on disk, and what the mirror is configured to keep. It performs
//! no I/O so the sync engine can call it once per asset without cost.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A rendition of an asset offered by the remote.
///
/// This is a 1-byte enum. The string form (see [`VersionId::as_str`]) is what
/// the index stores and what appears in rendition file names, so it must stay
/// free of `-` and `.`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum VersionId {
    Original = 0,
    Medium = 1,
    Thumb = 2,
    Adjusted = 3,
    Alternative = 4,
    #[serde(alias = "liveoriginal", alias = "live-video-original")]
    LiveOriginal = 5,
    #[serde(alias = "livemedium")]
    LiveMedium = 6,
    #[serde(alias = "livethumb")]
    LiveThumb = 7,
}

impl VersionId {
    pub const ALL: [VersionId; 8] = [
        Self::Original,
        Self::Medium,
        Self::Thumb,
        Self::Adjusted,
        Self::Alternative,
        Self::LiveOriginal,
        Self::LiveMedium,
        Self::LiveThumb,
    ];

    /// Stable token used in the index and in file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Medium => "medium",
            Self::Thumb => "thumb",
            Self::Adjusted => "adjusted",
            Self::Alternative => "alternative",
            Self::LiveOriginal => "live_original",
            Self::LiveMedium => "live_medium",
            Self::LiveThumb => "live_thumb",
        }
    }

    /// Whether this rendition is the motion part of a live photo.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            Self::LiveOriginal | Self::LiveMedium | Self::LiveThumb
        )
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown rendition '{0}'")]
pub struct UnknownVersion(pub String);

impl FromStr for VersionId {
    type Err = UnknownVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "original" => Ok(Self::Original),
            "medium" => Ok(Self::Medium),
            "thumb" => Ok(Self::Thumb),
            "adjusted" => Ok(Self::Adjusted),
            "alternative" => Ok(Self::Alternative),
            "live_original" | "liveoriginal" | "live-video-original" => Ok(Self::LiveOriginal),
            "live_medium" | "livemedium" => Ok(Self::LiveMedium),
            "live_thumb" | "livethumb" => Ok(Self::LiveThumb),
            other => Err(UnknownVersion(other.to_string())),
        }
    }
}

/// Compute the renditions that still have to be fetched:
/// `{v in policy : v in available and v not in downloaded}`.
pub fn resolve(
    available: &BTreeSet<VersionId>,
    downloaded: &BTreeSet<VersionId>,
    policy: &[VersionId],
) -> BTreeSet<VersionId> {
    policy
        .iter()
        .filter(|v| available.contains(v) && !downloaded.contains(v))
        .copied()
        .collect()
}

/// Ordered list of renditions the mirror keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPolicy {
    order: Vec<VersionId>,
}

impl Default for VersionPolicy {
    fn default() -> Self {
        Self::new([
            VersionId::Original,
            VersionId::LiveOriginal,
            VersionId::Adjusted,
            VersionId::Alternative,
        ])
    }
}

impl VersionPolicy {
    /// Build a policy, keeping the first occurrence of any duplicate.
    pub fn new(order: impl IntoIterator<Item = VersionId>) -> Self {
        let mut seen = BTreeSet::new();
        let order = order.into_iter().filter(|v| seen.insert(*v)).collect();
        Self { order }
    }

    /// Parse a policy from user-supplied tokens.
    pub fn parse<S: AsRef<str>>(tokens: &[S]) -> Result<Self, UnknownVersion> {
        let parsed = tokens
            .iter()
            .map(|t| t.as_ref().trim().parse::<VersionId>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(parsed))
    }

    pub fn as_slice(&self) -> &[VersionId] {
        &self.order
    }

    /// Same result as [`resolve`], returned in policy order.
    pub fn ordered_needed(
        &self,
        available: &BTreeSet<VersionId>,
        downloaded: &BTreeSet<VersionId>,
    ) -> Vec<VersionId> {
        let needed = resolve(available, downloaded, &self.order);
        self.order
            .iter()
            .filter(|v| needed.contains(v))
            .copied()
            .collect()
    }
}

impl fmt::Display for VersionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.order.iter().map(VersionId::as_str).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::mem::size_of;

    fn set(items: &[VersionId]) -> BTreeSet<VersionId> {
        items.iter().copied().collect()
    }

    #[test]
    fn test_version_id_round_trip() {
        for v in VersionId::ALL {
            assert_eq!(v.as_str().parse::<VersionId>(), Ok(v));
        }
    }

    #[test]
    fn test_version_id_aliases() {
        assert_eq!("liveoriginal".parse(), Ok(VersionId::LiveOriginal));
        assert_eq!("live-video-original".parse(), Ok(VersionId::LiveOriginal));
        assert_eq!("livethumb".parse(), Ok(VersionId::LiveThumb));
    }

    #[test]
    fn test_version_id_unknown() {
        assert_eq!(
            "sidecar".parse::<VersionId>(),
            Err(UnknownVersion("sidecar".to_string()))
        );
    }

    #[test]
    fn test_version_id_tokens_are_filename_safe() {
        for v in VersionId::ALL {
            assert!(!v.as_str().contains('-'));
            assert!(!v.as_str().contains('.'));
        }
    }

    #[test]
    fn test_version_id_serde_matches_as_str() {
        let json = serde_json::to_string(&set(&[VersionId::LiveOriginal, VersionId::Original]))
            .unwrap();
        assert_eq!(json, r#"["original","live_original"]"#);
        let back: BTreeSet<VersionId> = serde_json::from_str(r#"["livemedium"]"#).unwrap();
        assert_eq!(back, set(&[VersionId::LiveMedium]));
    }

    #[test]
    fn test_version_id_size() {
        assert_eq!(size_of::<VersionId>(), 1);
    }

    #[test]
    fn test_resolve_first_pass() {
        let needed = resolve(
            &set(&[VersionId::Original, VersionId::Adjusted]),
            &BTreeSet::new(),
            &[VersionId::Original, VersionId::Adjusted, VersionId::Alternative],
        );
        assert_eq!(needed, set(&[VersionId::Original, VersionId::Adjusted]));
    }

    #[test]
    fn test_resolve_new_rendition_only() {
        let needed = resolve(
            &set(&[VersionId::Original, VersionId::Adjusted, VersionId::Alternative]),
            &set(&[VersionId::Original, VersionId::Adjusted]),
            &[VersionId::Original, VersionId::Adjusted, VersionId::Alternative],
        );
        assert_eq!(needed, set(&[VersionId::Alternative]));
    }

    #[test]
    fn test_resolve_ignores_renditions_outside_policy() {
        let needed = resolve(
            &set(&[VersionId::Thumb, VersionId::Medium]),
            &BTreeSet::new(),
            &[VersionId::Original],
        );
        assert!(needed.is_empty());
    }

    #[test]
    fn test_policy_dedup_keeps_first() {
        let policy = VersionPolicy::new([
            VersionId::Adjusted,
            VersionId::Original,
            VersionId::Adjusted,
        ]);
        assert_eq!(
            policy.as_slice(),
            &[VersionId::Adjusted, VersionId::Original]
        );
    }

    #[test]
    fn test_policy_parse_rejects_unknown() {
        assert!(VersionPolicy::parse(&["original", "bogus"]).is_err());
        let policy = VersionPolicy::parse(&["original", " adjusted "]).unwrap();
        assert_eq!(
            policy.as_slice(),
            &[VersionId::Original, VersionId::Adjusted]
        );
    }

    #[test]
    fn test_ordered_needed_follows_policy() {
        let policy = VersionPolicy::new([
            VersionId::Alternative,
            VersionId::Original,
            VersionId::Adjusted,
        ]);
        let available = set(&[VersionId::Original, VersionId::Alternative, VersionId::Adjusted]);
        let ordered = policy.ordered_needed(&available, &set(&[VersionId::Adjusted]));
        assert_eq!(ordered, vec![VersionId::Alternative, VersionId::Original]);
    }

    #[test]
    fn test_default_policy() {
        assert_eq!(
            VersionPolicy::default().to_string(),
            "[original, live_original, adjusted, alternative]"
        );
    }

    fn any_version() -> impl Strategy<Value = VersionId> {
        prop::sample::select(VersionId::ALL.to_vec())
    }

    fn any_set() -> impl Strategy<Value = BTreeSet<VersionId>> {
        prop::collection::btree_set(any_version(), 0..=8)
    }

    proptest! {
        #[test]
        fn prop_resolve_matches_definition(
            available in any_set(),
            downloaded in any_set(),
            policy in prop::collection::vec(any_version(), 0..12),
        ) {
            let needed = resolve(&available, &downloaded, &policy);
            for v in VersionId::ALL {
                let expected = policy.contains(&v) && available.contains(&v) && !downloaded.contains(&v);
                prop_assert_eq!(needed.contains(&v), expected);
            }
        }

        #[test]
        fn prop_resolve_independent_of_policy_duplicates_and_order(
            available in any_set(),
            downloaded in any_set(),
            policy in prop::collection::vec(any_version(), 0..12),
        ) {
            let mut reversed = policy.clone();
            reversed.reverse();
            reversed.extend(policy.iter().copied());
            prop_assert_eq!(
                resolve(&available, &downloaded, &policy),
                resolve(&available, &downloaded, &reversed)
            );
        }

        #[test]
        fn prop_ordered_needed_is_resolve_in_policy_order(
            available in any_set(),
            downloaded in any_set(),
            policy in prop::collection::vec(any_version(), 0..12),
        ) {
            let policy = VersionPolicy::new(policy);
            let ordered = policy.ordered_needed(&available, &downloaded);
            let as_set: BTreeSet<VersionId> = ordered.iter().copied().collect();
            prop_assert_eq!(as_set.len(), ordered.len());
            prop_assert_eq!(as_set, resolve(&available, &downloaded, policy.as_slice()));
        }
    }
}
