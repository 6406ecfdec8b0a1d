//! Batched availability checks against the catalog.
//!
//! The catalog's own availability endpoint is best-effort. What a failed
//! batch means is a policy choice, see [`ProbeFailurePolicy`].

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    catalog::Catalog,
    error::{Error, Result},
    quality::QualityLevel,
    song::{Availability, Song, SongId},
};

/// How to treat songs whose availability could not be checked.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeFailurePolicy {
    /// Treat them as available and let the URL fetch decide. This may mask
    /// real catalog outages.
    #[default]
    Open,

    /// Report the failure to the caller.
    Closed,
}

pub struct AvailabilityProbe {
    catalog: Arc<dyn Catalog>,
    batch_size: usize,
    policy: ProbeFailurePolicy,
}

impl AvailabilityProbe {
    #[must_use]
    pub fn new(catalog: Arc<dyn Catalog>, batch_size: usize, policy: ProbeFailurePolicy) -> Self {
        Self {
            catalog,
            batch_size: batch_size.max(1),
            policy,
        }
    }

    #[must_use]
    pub fn policy(&self) -> ProbeFailurePolicy {
        self.policy
    }

    /// Checks many songs, de-duplicating IDs and splitting them into
    /// batches.
    ///
    /// IDs the catalog leaves out of its answer are reported available.
    /// Under [`ProbeFailurePolicy::Open`] the IDs of a failed batch are
    /// reported available as well.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if `cancel` fires, or the batch error under
    /// [`ProbeFailurePolicy::Closed`].
    pub async fn check(
        &self,
        ids: &[SongId],
        quality: QualityLevel,
        cancel: &CancellationToken,
    ) -> Result<HashMap<SongId, bool>> {
        let mut seen = HashSet::new();
        let unique: Vec<SongId> = ids
            .iter()
            .filter(|id| !id.is_empty() && seen.insert(*id))
            .cloned()
            .collect();

        let mut results = HashMap::with_capacity(unique.len());
        for batch in unique.chunks(self.batch_size) {
            let answer = tokio::select! {
                biased;

                () = cancel.cancelled() => return Err(Error::cancelled("availability check cancelled")),
                answer = self.catalog.batch_check_availability(batch, quality) => answer,
            };

            match answer {
                Ok(answer) => {
                    for id in batch {
                        let available = answer.get(id).copied().unwrap_or(true);
                        results.insert(id.clone(), available);
                    }
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => match self.policy {
                    ProbeFailurePolicy::Open => {
                        warn!(
                            "availability check of {} songs failed, treating them as available: {e}",
                            batch.len()
                        );
                        results.extend(batch.iter().map(|id| (id.clone(), true)));
                    }
                    ProbeFailurePolicy::Closed => return Err(e),
                },
            }
        }

        Ok(results)
    }

    /// Checks a single song.
    ///
    /// # Errors
    ///
    /// See [`check`](Self::check).
    pub async fn check_one(
        &self,
        id: &SongId,
        quality: QualityLevel,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let results = self
            .check(std::slice::from_ref(id), quality, cancel)
            .await?;
        Ok(results.get(id).copied().unwrap_or(true))
    }

    /// Checks all songs of unknown availability and records the outcome on
    /// them. Returns the IDs found unavailable.
    ///
    /// # Errors
    ///
    /// See [`check`](Self::check).
    pub async fn apply(
        &self,
        songs: &mut [Song],
        quality: QualityLevel,
        cancel: &CancellationToken,
    ) -> Result<Vec<SongId>> {
        let ids: Vec<SongId> = songs
            .iter()
            .filter(|song| !song.is_placeholder() && song.availability == Availability::Unknown)
            .map(|song| song.id.clone())
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let results = self.check(&ids, quality, cancel).await?;

        let mut unavailable = Vec::new();
        for song in songs
            .iter_mut()
            .filter(|song| song.availability == Availability::Unknown)
        {
            if let Some(available) = results.get(&song.id) {
                song.availability = Availability::from(*available);
                if !available {
                    unavailable.push(song.id.clone());
                }
            }
        }

        Ok(unavailable)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::{catalog::UrlInfo, error::ErrorKind};

    /// Records batch sizes; fails batches containing `"boom"`.
    #[derive(Default)]
    struct Recorder {
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl Catalog for Recorder {
        async fn batch_check_availability(
            &self,
            ids: &[SongId],
            _quality: QualityLevel,
        ) -> Result<HashMap<SongId, bool>> {
            self.batches.lock().unwrap().push(ids.len());
            if ids.iter().any(|id| id.as_str() == "boom") {
                return Err(Error::unavailable("catalog down"));
            }
            Ok(ids
                .iter()
                .map(|id| (id.clone(), !id.as_str().starts_with("gone")))
                .collect())
        }

        async fn get_song_urls(
            &self,
            _ids: &[SongId],
            _quality: QualityLevel,
            _skip_check: bool,
            _cancel: &CancellationToken,
        ) -> Result<HashMap<SongId, UrlInfo>> {
            unimplemented!()
        }

        async fn get_song_details(&self, _ids: &[SongId]) -> Result<Vec<Song>> {
            unimplemented!()
        }
    }

    fn ids(raw: &[&str]) -> Vec<SongId> {
        raw.iter().copied().map(SongId::from).collect()
    }

    #[tokio::test]
    async fn deduplicates_and_batches() {
        let catalog = Arc::new(Recorder::default());
        let probe = AvailabilityProbe::new(catalog.clone(), 2, ProbeFailurePolicy::Open);

        let results = probe
            .check(
                &ids(&["1", "2", "1", "gone-3", "", "4"]),
                QualityLevel::Standard,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(*catalog.batches.lock().unwrap(), vec![2, 2]);
        assert_eq!(results.len(), 4);
        assert_eq!(results[&SongId::from("gone-3")], false);
        assert_eq!(results[&SongId::from("4")], true);
    }

    #[tokio::test]
    async fn failed_batch_degrades_open() {
        let probe = AvailabilityProbe::new(Arc::new(Recorder::default()), 100, ProbeFailurePolicy::Open);
        let available = probe
            .check_one(&SongId::from("boom"), QualityLevel::Standard, &CancellationToken::new())
            .await
            .unwrap();
        assert!(available);
    }

    #[tokio::test]
    async fn failed_batch_closed_reports_error() {
        let probe =
            AvailabilityProbe::new(Arc::new(Recorder::default()), 100, ProbeFailurePolicy::Closed);
        let err = probe
            .check_one(&SongId::from("boom"), QualityLevel::Standard, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn cancelled_before_first_batch() {
        let probe = AvailabilityProbe::new(Arc::new(Recorder::default()), 100, ProbeFailurePolicy::Open);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = probe
            .check(&ids(&["1"]), QualityLevel::Standard, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn apply_marks_songs() {
        let probe = AvailabilityProbe::new(Arc::new(Recorder::default()), 100, ProbeFailurePolicy::Open);
        let mut songs = vec![Song::new("1", "One"), Song::new("gone-2", "Two")];
        songs[0].availability = Availability::Available;

        let unavailable = probe
            .apply(&mut songs, QualityLevel::Standard, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(unavailable, ids(&["gone-2"]));
        assert_eq!(songs[1].availability, Availability::Unavailable);
    }
}
