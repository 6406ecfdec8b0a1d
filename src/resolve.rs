//! Resolution of songs to playable stream URLs.
//!
//! [`Resolver::resolve`] runs the following steps, stopping at the first
//! that settles the outcome:
//!
//! 1. A song known to be unavailable, and not unblocked before, is handed
//!    to the unblock fallback or reported [`ResolveResult::NotAvailable`]
//! 2. A cached full stream for the requested level is accepted as is
//! 3. A cached trial fragment gets one unblock attempt, then is discarded
//! 4. Songs of unknown availability are probed
//! 5. A fresh URL is fetched with retry and backoff. Missing resources and
//!    paid albums are not retried
//! 6. Empty URLs and fetch failures get one unblock attempt
//! 7. Trial fragments get one unblock attempt. Without a substitute, a
//!    fragment with valid bounds is accepted and an invalid one makes the
//!    song unavailable
//! 8. The stream is committed to the song's quality cache
//!
//! # Ownership
//!
//! Resolution works on a copy of the song. The copy is written back, with a
//! higher revision, only if the attempt was not cancelled, so a superseded
//! attempt leaves no trace. Lower-level errors never escape: they are folded
//! into a [`ResolveResult`].

use std::{fmt, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{
    catalog::{Catalog, UrlInfo},
    config::Config,
    error::{ErrorKind, Result},
    http::ContentLength,
    probe::AvailabilityProbe,
    quality::{estimate_size, QualityLevel, QualityUrlInfo},
    retry::{with_retry, RetryPolicy},
    song::{Availability, Song},
    unblock::UnblockFallback,
    view::ListView,
};

/// Outcome of one resolution attempt.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResolveResult {
    /// A playable stream is in the song's quality cache.
    Success { used_unblock: bool },

    /// The attempt was superseded. Nothing was changed.
    Canceled,

    /// The catalog confirms the song is gone and no substitute was found.
    NotAvailable,

    /// The song belongs to a paid album that was not purchased.
    PaidAlbumNotPurchased,

    /// Transient failure after all retries.
    Failed,
}

impl ResolveResult {
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl fmt::Display for ResolveResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { used_unblock: true } => write!(f, "resolved through unblock"),
            Self::Success { used_unblock: false } => write!(f, "resolved"),
            Self::Canceled => write!(f, "canceled"),
            Self::NotAvailable => write!(f, "not available"),
            Self::PaidAlbumNotPurchased => write!(f, "paid album not purchased"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

pub struct Resolver {
    catalog: Arc<dyn Catalog>,
    probe: AvailabilityProbe,
    unblock: UnblockFallback,
    content_length: Arc<dyn ContentLength>,
    view: Arc<dyn ListView>,
    fetch: RetryPolicy,
    content_length_timeout: Duration,
}

impl Resolver {
    #[must_use]
    pub fn new(
        config: &Config,
        catalog: Arc<dyn Catalog>,
        unblock: UnblockFallback,
        content_length: Arc<dyn ContentLength>,
        view: Arc<dyn ListView>,
    ) -> Self {
        Self {
            probe: AvailabilityProbe::new(
                Arc::clone(&catalog),
                config.probe_batch_size,
                config.probe_failure,
            ),
            catalog,
            unblock,
            content_length,
            view,
            fetch: config.fetch,
            content_length_timeout: config.content_length_timeout,
        }
    }

    #[must_use]
    pub fn probe(&self) -> &AvailabilityProbe {
        &self.probe
    }

    /// Resolves `song` to a playable stream at `level`.
    ///
    /// Placeholders cannot be resolved and yield [`ResolveResult::Failed`].
    pub async fn resolve(
        &self,
        song: &mut Song,
        level: QualityLevel,
        cancel: &CancellationToken,
    ) -> ResolveResult {
        if song.is_placeholder() {
            warn!("cannot resolve unloaded {song}");
            return ResolveResult::Failed;
        }
        if cancel.is_cancelled() {
            return ResolveResult::Canceled;
        }

        let mut work = song.clone();
        let result = self.run(&mut work, level, cancel).await;
        if result == ResolveResult::Canceled || cancel.is_cancelled() {
            trace!("resolving {song} was superseded");
            return ResolveResult::Canceled;
        }

        if work != *song {
            let availability_changed = work.availability != song.availability;
            work.revision = song.revision + 1;
            *song = work;
            if availability_changed || result.is_success() {
                self.view.refresh_availability(&song.id, song.availability);
            }
        }

        debug!("{song} at {level}: {result}");
        result
    }

    async fn run(&self, song: &mut Song, level: QualityLevel, cancel: &CancellationToken) -> ResolveResult {
        if song.availability == Availability::Unavailable && !song.is_unblocked() {
            return self.unblock_or(song, level, cancel, ResolveResult::NotAvailable).await;
        }

        if let Some(cached) = song.stream(level).filter(|stream| stream.available) {
            if !cached.is_trial() {
                trace!("using cached {} stream of {song}", cached.level);
                return ResolveResult::Success {
                    used_unblock: song.is_unblocked(),
                };
            }

            if self.unblock.try_unblock(song, level, cancel).await {
                return ResolveResult::Success { used_unblock: true };
            }
            if cancel.is_cancelled() {
                return ResolveResult::Canceled;
            }
            debug!("discarding cached trial stream of {song}");
            song.qualities.remove(level);
        }

        if song.availability == Availability::Unknown {
            match self.probe.check_one(&song.id, level, cancel).await {
                Ok(true) => {}
                Ok(false) => {
                    song.availability = Availability::Unavailable;
                    return self.unblock_or(song, level, cancel, ResolveResult::NotAvailable).await;
                }
                Err(e) if e.is_cancelled() => return ResolveResult::Canceled,
                Err(e) => {
                    error!("availability of {song} unknown: {e}");
                    return ResolveResult::Failed;
                }
            }
        }

        let info = match self.fetch_url(song, level, cancel).await {
            Ok(info) => info,
            Err(e) => {
                return match e.kind {
                    ErrorKind::Cancelled => ResolveResult::Canceled,
                    ErrorKind::NotFound => {
                        debug!("{song} is gone from the catalog");
                        song.availability = Availability::Unavailable;
                        self.unblock_or(song, level, cancel, ResolveResult::NotAvailable).await
                    }
                    ErrorKind::PermissionDenied => ResolveResult::PaidAlbumNotPurchased,
                    _ => {
                        warn!("fetching url of {song} failed: {e}");
                        self.unblock_or(song, level, cancel, ResolveResult::Failed).await
                    }
                };
            }
        };

        let Some(url) = info.url.clone() else {
            debug!("catalog returned no url for {song}");
            return self.unblock_or(song, level, cancel, ResolveResult::Failed).await;
        };

        if let Some(trial) = info.trial {
            if self.unblock.try_unblock(song, level, cancel).await {
                return ResolveResult::Success { used_unblock: true };
            }
            if cancel.is_cancelled() {
                return ResolveResult::Canceled;
            }
            if !trial.is_playable(info.size) {
                debug!("trial fragment of {song} is not playable");
                song.availability = Availability::Unavailable;
                return ResolveResult::NotAvailable;
            }
            info!(
                "playing {:.0}s trial fragment of {song}",
                trial.length().as_secs_f32()
            );
        }

        let served = info.level.unwrap_or(level);
        let size = if info.trial.is_some() {
            info.size
        } else {
            self.stream_size(song, &info, &url, served, cancel).await
        };
        if cancel.is_cancelled() {
            return ResolveResult::Canceled;
        }

        song.qualities.insert(
            level,
            QualityUrlInfo {
                level: served,
                url,
                size,
                trial: info.trial,
                available: true,
            },
        );
        song.availability = Availability::Available;
        song.unblock = None;
        song.size = size;

        ResolveResult::Success { used_unblock: false }
    }

    async fn unblock_or(
        &self,
        song: &mut Song,
        level: QualityLevel,
        cancel: &CancellationToken,
        otherwise: ResolveResult,
    ) -> ResolveResult {
        if self.unblock.try_unblock(song, level, cancel).await {
            ResolveResult::Success { used_unblock: true }
        } else if cancel.is_cancelled() {
            ResolveResult::Canceled
        } else {
            otherwise
        }
    }

    async fn fetch_url(&self, song: &Song, level: QualityLevel, cancel: &CancellationToken) -> Result<UrlInfo> {
        let ids = std::slice::from_ref(&song.id);
        let mut urls = with_retry(
            &self.fetch,
            cancel,
            |attempt| {
                trace!("fetching url of {song}, attempt {attempt}");
                self.catalog.get_song_urls(ids, level, true, cancel)
            },
            |e| !matches!(e.kind, ErrorKind::NotFound | ErrorKind::PermissionDenied),
        )
        .await?;

        Ok(urls.remove(&song.id).unwrap_or_else(|| UrlInfo {
            id: song.id.clone(),
            ..UrlInfo::default()
        }))
    }

    /// Size in priority order: reported by the catalog, probed from the
    /// host, estimated from bitrate and duration.
    async fn stream_size(
        &self,
        song: &Song,
        info: &UrlInfo,
        url: &url::Url,
        served: QualityLevel,
        cancel: &CancellationToken,
    ) -> u64 {
        if info.size > 0 {
            return info.size;
        }

        let headers = http::HeaderMap::new();
        let probe = self.content_length.content_length(url, &headers);
        let probed = tokio::select! {
            biased;

            () = cancel.cancelled() => None,
            result = tokio::time::timeout(self.content_length_timeout, probe) => {
                result.ok().and_then(Result::ok).flatten()
            }
        };
        if let Some(size) = probed.filter(|size| *size > 0) {
            return size;
        }

        let bitrate = if info.bitrate > 0 {
            info.bitrate
        } else {
            served.approximate_bitrate()
        };
        estimate_size(bitrate, song.duration.as_secs())
    }
}
