//! Third-party stream substitution for songs the catalog cannot serve.
//!
//! The fallback never fails past its own boundary: callers only learn
//! whether a substitute stream was committed to the song.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use http::HeaderMap;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    catalog::Catalog,
    config::Config,
    error::{Error, Result},
    http::ContentLength,
    quality::{estimate_size, normalize_duration_secs, QualityLevel, QualityUrlInfo},
    song::{Availability, Song, UnblockInfo},
};

/// Substitute stream offered by a matching service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnblockMatch {
    pub url: Url,
    pub headers: HeaderMap,
    /// Stream size in bytes, if the service knows it.
    pub size: Option<u64>,
    /// Bitrate in bits per second.
    pub bitrate: Option<u64>,
    pub duration_ms: Option<u64>,
    /// Provider the match came from.
    pub source: String,
}

#[async_trait]
pub trait Unblocker: Send + Sync {
    async fn try_match(&self, song: &Song, cancel: &CancellationToken) -> Result<Option<UnblockMatch>>;
}

pub struct UnblockFallback {
    unblocker: Option<Arc<dyn Unblocker>>,
    catalog: Arc<dyn Catalog>,
    content_length: Arc<dyn ContentLength>,
    timeout: Duration,
    content_length_timeout: Duration,
    fallback_size: u64,
}

impl UnblockFallback {
    #[must_use]
    pub fn new(
        config: &Config,
        unblocker: Option<Arc<dyn Unblocker>>,
        catalog: Arc<dyn Catalog>,
        content_length: Arc<dyn ContentLength>,
    ) -> Self {
        Self {
            unblocker,
            catalog,
            content_length,
            timeout: config.unblock_timeout,
            content_length_timeout: config.content_length_timeout,
            fallback_size: config.unblock_fallback_size,
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.unblocker.is_some()
    }

    /// Tries to substitute a third-party stream for `song` at `level`.
    ///
    /// On success the song is marked available and unblocked, and the stream
    /// is stored in its quality cache under `level`. On failure the song is
    /// left untouched.
    pub async fn try_unblock(
        &self,
        song: &mut Song,
        level: QualityLevel,
        cancel: &CancellationToken,
    ) -> bool {
        let Some(unblocker) = self.unblocker.as_deref() else {
            return false;
        };
        if song.is_placeholder() {
            return false;
        }

        let matched = tokio::select! {
            biased;

            () = cancel.cancelled() => return false,
            result = tokio::time::timeout(self.timeout, self.find_match(unblocker, song, cancel)) => {
                result.map_err(Error::from).and_then(|result| result)
            }
        };

        let (mut candidate, matched) = match matched {
            Ok(Some(found)) => found,
            Ok(None) => {
                debug!("no substitute stream for {song}");
                return false;
            }
            Err(e) => {
                if !e.is_cancelled() {
                    debug!("unblocking {song} failed: {e}");
                }
                return false;
            }
        };

        let size = self.stream_size(&candidate, &matched, level, cancel).await;
        if cancel.is_cancelled() {
            return false;
        }

        candidate.availability = Availability::Available;
        candidate.size = size;
        candidate.qualities.insert(
            level,
            QualityUrlInfo {
                level,
                url: matched.url,
                size,
                trial: None,
                available: true,
            },
        );
        candidate.unblock = Some(UnblockInfo {
            source: matched.source,
            headers: matched.headers,
        });

        info!(
            "unblocked {candidate} through {}, {size} bytes",
            candidate.unblock.as_ref().map_or("", |unblock| unblock.source.as_str())
        );
        *song = candidate;
        true
    }

    /// Refreshes incomplete metadata, then asks the matching service. Works
    /// on a copy so that an abandoned attempt leaves no trace.
    async fn find_match(
        &self,
        unblocker: &dyn Unblocker,
        song: &Song,
        cancel: &CancellationToken,
    ) -> Result<Option<(Song, UnblockMatch)>> {
        let mut candidate = song.clone();

        if candidate.needs_detail() {
            match self
                .catalog
                .get_song_details(std::slice::from_ref(&candidate.id))
                .await
            {
                Ok(details) => {
                    if let Some(detail) = details.iter().find(|detail| detail.id == candidate.id) {
                        candidate.merge_detail(detail);
                    }
                }
                Err(e) => debug!("refreshing detail of {candidate} failed: {e}"),
            }
        }

        let Some(matched) = unblocker.try_match(&candidate, cancel).await? else {
            return Ok(None);
        };

        if let Some(duration_ms) = matched.duration_ms.filter(|ms| *ms > 0) {
            let matched_secs = normalize_duration_secs((duration_ms + 500) / 1000);
            let known_secs = normalize_duration_secs(candidate.duration.as_secs());
            if matched_secs > 0 && (known_secs == 0 || matched_secs.abs_diff(known_secs) > 1) {
                trace!("taking duration of {candidate} from match: {matched_secs}s");
                candidate.duration = Duration::from_secs(matched_secs);
            }
        }

        Ok(Some((candidate, matched)))
    }

    /// Size in priority order: reported by the match, probed from the host,
    /// estimated from bitrate and duration, last known, fixed fallback.
    async fn stream_size(
        &self,
        song: &Song,
        matched: &UnblockMatch,
        level: QualityLevel,
        cancel: &CancellationToken,
    ) -> u64 {
        if let Some(size) = matched.size.filter(|size| *size > 0) {
            return size;
        }

        let probe = self.content_length.content_length(&matched.url, &matched.headers);
        let probed = tokio::select! {
            biased;

            () = cancel.cancelled() => None,
            result = tokio::time::timeout(self.content_length_timeout, probe) => match result {
                Ok(Ok(length)) => length,
                Ok(Err(e)) => {
                    debug!("content length of {} unknown: {e}", matched.url);
                    None
                }
                Err(_) => {
                    debug!("content length probe of {} timed out", matched.url);
                    None
                }
            },
        };
        if let Some(size) = probed.filter(|size| *size > 0) {
            return size;
        }

        let bitrate = matched
            .bitrate
            .filter(|bitrate| *bitrate > 0)
            .unwrap_or_else(|| level.approximate_bitrate());
        let estimate = estimate_size(bitrate, song.duration.as_secs());
        if estimate > 0 {
            trace!("estimated size of {song}: {estimate} bytes at {bitrate} bps");
            return estimate;
        }

        if song.size > 0 {
            song.size
        } else {
            self.fallback_size
        }
    }
}
