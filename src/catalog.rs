//! Catalog collaborator interface.
//!
//! The wire format of the catalog API is not this crate's concern. Clients
//! implement [`Catalog`] and report the two distinguished failure conditions
//! through the error kind:
//!
//! * [`ErrorKind::NotFound`](crate::error::ErrorKind::NotFound) when the
//!   resource is gone from the catalog
//! * [`ErrorKind::PermissionDenied`](crate::error::ErrorKind::PermissionDenied)
//!   when the song belongs to a paid album that was not purchased

use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    error::Result,
    quality::{QualityLevel, TrialWindow},
    song::{Song, SongId, ViewSource},
};

/// Stream URL as returned by the catalog.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UrlInfo {
    pub id: SongId,
    /// `None` when the catalog returned an empty URL.
    pub url: Option<Url>,
    /// Level actually served.
    pub level: Option<QualityLevel>,
    /// Stream size in bytes, `0` when not reported.
    pub size: u64,
    /// Bitrate in bits per second, `0` when not reported.
    pub bitrate: u64,
    pub trial: Option<TrialWindow>,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Checks playability of many songs at once.
    async fn batch_check_availability(
        &self,
        ids: &[SongId],
        quality: QualityLevel,
    ) -> Result<HashMap<SongId, bool>>;

    /// Fetches stream URLs. With `skip_check` the catalog does not repeat its
    /// own availability check.
    async fn get_song_urls(
        &self,
        ids: &[SongId],
        quality: QualityLevel,
        skip_check: bool,
        cancel: &CancellationToken,
    ) -> Result<HashMap<SongId, UrlInfo>>;

    /// Fetches full song details. Unknown IDs are left out of the result.
    async fn get_song_details(&self, ids: &[SongId]) -> Result<Vec<Song>>;
}

/// Endless personal radio that hands out songs in batches.
#[async_trait]
pub trait RadioFeed: Send + Sync {
    /// Tag under which radio songs are queued.
    fn source(&self) -> ViewSource;

    async fn fetch_more(&self, cancel: &CancellationToken) -> Result<Vec<Song>>;
}
