//! Audio quality levels and the per-song cache of resolved stream URLs.
//!
//! A song may be resolved at several quality levels over its lifetime. Each
//! resolution is kept in a [`QualityCache`] keyed by the level that was
//! *requested*, while the entry itself records the level the catalog actually
//! served.

use std::{collections::BTreeMap, fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Audio quality levels offered by the catalog, from lowest to highest.
///
/// Serialized with the catalog's wire names (`standard`, `exhigh`,
/// `jymaster`, ...). Parsing also accepts the friendly aliases `high`,
/// `surroundhd`, `dolby` and `master`.
#[derive(
    Copy, Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[cfg_attr(feature = "binary", derive(clap::ValueEnum))]
pub enum QualityLevel {
    /// 128 kbps
    #[serde(rename = "standard")]
    Standard,

    /// 192 kbps
    #[serde(rename = "higher")]
    Higher,

    /// 320 kbps
    #[serde(rename = "exhigh", alias = "high")]
    High,

    /// CD quality lossless
    #[serde(rename = "lossless")]
    Lossless,

    /// High resolution lossless
    #[serde(rename = "hires")]
    HiRes,

    /// Spatial surround
    #[serde(rename = "jyeffect", alias = "surroundhd")]
    SurroundHd,

    /// Dolby Atmos
    #[serde(rename = "sky", alias = "dolby")]
    Dolby,

    /// Studio master
    #[default]
    #[serde(rename = "jymaster", alias = "master")]
    Master,
}

impl QualityLevel {
    /// Catalog wire name of this level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Higher => "higher",
            Self::High => "exhigh",
            Self::Lossless => "lossless",
            Self::HiRes => "hires",
            Self::SurroundHd => "jyeffect",
            Self::Dolby => "sky",
            Self::Master => "jymaster",
        }
    }

    /// Approximate bitrate in bits per second, used to estimate stream sizes
    /// when neither the catalog nor the stream host report one.
    #[must_use]
    pub const fn approximate_bitrate(self) -> u64 {
        match self {
            Self::Standard => 128_000,
            Self::Higher => 192_000,
            Self::High => 320_000,
            Self::Lossless => 999_000,
            Self::HiRes | Self::SurroundHd => 2_000_000,
            Self::Dolby => 3_200_000,
            Self::Master => 4_000_000,
        }
    }
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "Standard"),
            Self::Higher => write!(f, "Higher"),
            Self::High => write!(f, "High Quality"),
            Self::Lossless => write!(f, "Lossless"),
            Self::HiRes => write!(f, "Hi-Res"),
            Self::SurroundHd => write!(f, "Surround HD"),
            Self::Dolby => write!(f, "Dolby Atmos"),
            Self::Master => write!(f, "Master"),
        }
    }
}

impl FromStr for QualityLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let variant = match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Self::Standard,
            "higher" => Self::Higher,
            "exhigh" | "high" => Self::High,
            "lossless" => Self::Lossless,
            "hires" => Self::HiRes,
            "jyeffect" | "surroundhd" => Self::SurroundHd,
            "sky" | "dolby" => Self::Dolby,
            "jymaster" | "master" => Self::Master,
            _ => return Err(Error::invalid_argument(format!("unknown quality level: {s}"))),
        };

        Ok(variant)
    }
}

/// Time-bounded preview window of a trial fragment, in milliseconds from the
/// start of the full track.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrialWindow {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl TrialWindow {
    #[must_use]
    pub fn new(start_ms: u64, end_ms: u64) -> Self {
        Self { start_ms, end_ms }
    }

    /// A fragment is playable only when it spans a positive interval and the
    /// stream has a known, non-zero size.
    #[must_use]
    pub fn is_playable(&self, size: u64) -> bool {
        self.end_ms > self.start_ms && size > 0
    }

    #[must_use]
    pub fn length(&self) -> Duration {
        Duration::from_millis(self.end_ms.saturating_sub(self.start_ms))
    }
}

/// A resolved stream for one quality level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QualityUrlInfo {
    /// Level actually served, which may be lower than the level requested.
    pub level: QualityLevel,
    pub url: Url,
    /// Stream size in bytes.
    pub size: u64,
    /// Set when the catalog only returned a preview fragment.
    pub trial: Option<TrialWindow>,
    pub available: bool,
}

impl QualityUrlInfo {
    #[must_use]
    pub fn is_trial(&self) -> bool {
        self.trial.is_some()
    }
}

/// Per-song map of requested quality level to resolved stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QualityCache(BTreeMap<QualityLevel, QualityUrlInfo>);

impl QualityCache {
    #[must_use]
    pub fn get(&self, requested: QualityLevel) -> Option<&QualityUrlInfo> {
        self.0.get(&requested)
    }

    /// Stores `info` under the level that was requested. Returns the entry it
    /// replaced, if any.
    pub fn insert(&mut self, requested: QualityLevel, info: QualityUrlInfo) -> Option<QualityUrlInfo> {
        self.0.insert(requested, info)
    }

    pub fn remove(&mut self, requested: QualityLevel) -> Option<QualityUrlInfo> {
        self.0.remove(&requested)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&QualityLevel, &QualityUrlInfo)> {
        self.0.iter()
    }
}

/// Longest duration, in seconds, that is plausibly a duration in seconds.
/// Larger values are taken to be milliseconds.
const MAX_PLAUSIBLE_SECONDS: u64 = 12 * 60 * 60;

/// Normalizes a raw duration reported in seconds, correcting values that were
/// evidently reported in milliseconds.
#[must_use]
pub fn normalize_duration_secs(raw: u64) -> u64 {
    if raw > MAX_PLAUSIBLE_SECONDS {
        (raw / 1000).max(1)
    } else {
        raw
    }
}

/// Estimates a stream size in bytes from a bitrate and a duration.
///
/// Bitrates below 1000 are taken to be in kbps. Returns `0` when either input
/// is unknown.
#[must_use]
pub fn estimate_size(bitrate: u64, duration_secs: u64) -> u64 {
    let duration_secs = normalize_duration_secs(duration_secs);
    if bitrate == 0 || duration_secs == 0 {
        return 0;
    }

    let bitrate = if bitrate < 1000 { bitrate * 1000 } else { bitrate };
    bitrate / 8 * duration_secs
}
