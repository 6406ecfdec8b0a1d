use std::{borrow::Borrow, fmt, time::Duration};

use http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use url::Url;
use veil::Redact;

use crate::quality::{QualityCache, QualityLevel, QualityUrlInfo};

/// Catalog identity of a song. Empty for placeholders.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SongId(String);

impl SongId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_owned())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SongId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SongId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SongId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl Borrow<str> for SongId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Tag of the list that produced a song, such as a playlist or search result.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewSource(String);

impl ViewSource {
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self(source.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ViewSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ViewSource {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    #[default]
    Unknown,
    Available,
    Unavailable,
}

impl From<bool> for Availability {
    fn from(available: bool) -> Self {
        if available {
            Self::Available
        } else {
            Self::Unavailable
        }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Available => write!(f, "available"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Substitute stream provenance for a song played through a third-party
/// match. Headers may carry cookies of the matching provider.
#[derive(Clone, PartialEq, Eq, Redact)]
pub struct UnblockInfo {
    pub source: String,
    #[redact]
    pub headers: HeaderMap,
}

/// A catalog entry, or a placeholder standing in for one.
///
/// Songs are owned values. Resolution works on a copy and the result is
/// committed back with a higher `revision`, so that stale copies held by the
/// queue or caches can be recognized and replaced.
#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Song {
    pub id: SongId,
    pub name: String,
    pub artists: Vec<String>,
    pub album: String,
    pub album_id: String,
    pub cover: Option<Url>,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub duration: Duration,

    /// Last known stream size in bytes.
    pub size: u64,
    pub availability: Availability,

    #[serde(skip)]
    pub qualities: QualityCache,
    #[serde(skip)]
    pub unblock: Option<UnblockInfo>,

    pub view_source: Option<ViewSource>,
    /// Position in the producing list, for placeholders.
    pub slot: Option<usize>,

    #[serde(skip)]
    pub revision: u64,
}

impl Song {
    #[must_use]
    pub fn new(id: impl Into<SongId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Creates a placeholder for the entry at `slot` of a lazily loaded list.
    #[must_use]
    pub fn placeholder(view_source: ViewSource, slot: usize) -> Self {
        Self {
            view_source: Some(view_source),
            slot: Some(slot),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.id.is_empty()
    }

    #[must_use]
    pub fn is_unblocked(&self) -> bool {
        self.unblock.is_some()
    }

    #[must_use]
    pub fn artist(&self) -> String {
        self.artists.join("/")
    }

    /// Name and artist for status messages.
    #[must_use]
    pub fn friendly_name(&self) -> String {
        if self.artists.is_empty() {
            self.name.clone()
        } else {
            format!("{} - {}", self.name, self.artist())
        }
    }

    #[must_use]
    pub fn stream(&self, requested: QualityLevel) -> Option<&QualityUrlInfo> {
        self.qualities.get(requested)
    }

    /// Whether the metadata needed for third-party matching is incomplete.
    #[must_use]
    pub fn needs_detail(&self) -> bool {
        self.availability == Availability::Unavailable
            || self.duration.is_zero()
            || self.album_id.is_empty()
            || self.artists.is_empty()
    }

    /// Fills in missing metadata from a freshly fetched catalog entry.
    pub fn merge_detail(&mut self, detail: &Song) {
        if !detail.duration.is_zero()
            && (self.duration.is_zero()
                || self.duration.abs_diff(detail.duration) > Duration::from_secs(1))
        {
            self.duration = detail.duration;
        }
        if self.album_id.is_empty() && !detail.album_id.is_empty() {
            self.album_id.clone_from(&detail.album_id);
        }
        if self.album.is_empty() && !detail.album.is_empty() {
            self.album.clone_from(&detail.album);
        }
        if self.artists.is_empty() && !detail.artists.is_empty() {
            self.artists.clone_from(&detail.artists);
        }
        if self.cover.is_none() {
            self.cover.clone_from(&detail.cover);
        }
    }

    /// Adopts resolution state from another copy of the same song when that
    /// copy is newer.
    pub fn adopt_if_newer(&mut self, other: &Song) -> bool {
        if other.id != self.id || other.revision <= self.revision {
            return false;
        }

        self.qualities.clone_from(&other.qualities);
        self.unblock.clone_from(&other.unblock);
        self.availability = other.availability;
        self.size = other.size;
        self.merge_detail(other);
        self.revision = other.revision;
        true
    }
}

impl fmt::Display for Song {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_placeholder() {
            match self.slot {
                Some(slot) => write!(f, "placeholder #{slot}"),
                None => write!(f, "placeholder"),
            }
        } else {
            write!(f, "{} ({})", self.friendly_name(), self.id)
        }
    }
}
