//! On-demand loading of placeholder songs in lazily loaded lists.
//!
//! Large lists are shown with placeholders for entries that were not fetched
//! yet. The list layer registers the ordered song IDs of such a list with
//! [`PlaceholderResolver::remember_ids`]; a placeholder is then resolved by
//! fetching the page of details that contains it.
//!
//! `None` from [`PlaceholderResolver::resolve`] means "not resolved yet",
//! never "unavailable". A playback request for such an entry can be parked
//! and is dispatched once the list layer patches that entry.

use std::{
    collections::HashSet,
    num::NonZeroUsize,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use lru::LruCache;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    catalog::Catalog,
    config::Config,
    error::{Error, Result},
    song::{Song, SongId, ViewSource},
    view::ListView,
};

type Slot = (ViewSource, usize);

pub struct PlaceholderResolver {
    catalog: Arc<dyn Catalog>,
    view: Arc<dyn ListView>,

    id_lists: Mutex<LruCache<ViewSource, Arc<Vec<SongId>>>>,
    in_flight: Mutex<HashSet<Slot>>,
    pending: Mutex<Option<Slot>>,

    batch_size: usize,
    batch_spacing: Duration,
    next_batch: Mutex<Option<Instant>>,
    timeout: Duration,
}

/// Releases an in-flight slot when the fetch ends, however it ends.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<Slot>>,
    slot: Slot,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.slot);
    }
}

impl PlaceholderResolver {
    #[must_use]
    pub fn new(config: &Config, catalog: Arc<dyn Catalog>, view: Arc<dyn ListView>) -> Self {
        Self {
            catalog,
            view,
            id_lists: Mutex::new(LruCache::new(
                NonZeroUsize::new(config.id_list_capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            in_flight: Mutex::new(HashSet::new()),
            pending: Mutex::new(None),
            batch_size: config.placeholder_batch_size.max(1),
            batch_spacing: config.placeholder_batch_spacing,
            next_batch: Mutex::new(None),
            timeout: config.placeholder_timeout,
        }
    }

    /// Registers the ordered IDs behind the list `source`. The least
    /// recently used list is forgotten when over capacity.
    pub fn remember_ids(&self, source: ViewSource, ids: Vec<SongId>) {
        trace!("remembering {} ids of {source}", ids.len());
        self.id_lists
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(source, Arc::new(ids));
    }

    #[must_use]
    pub fn ids(&self, source: &ViewSource) -> Option<Arc<Vec<SongId>>> {
        self.id_lists
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
            .map(Arc::clone)
    }

    /// Resolves the entry at `index` of the list `source`.
    ///
    /// Returns `None` if the list is unknown, the entry is being fetched by
    /// another request, the fetch failed, or `cancel` fired.
    pub async fn resolve(
        &self,
        source: &ViewSource,
        index: usize,
        cancel: &CancellationToken,
    ) -> Option<Song> {
        if let Some(song) = self.loaded(source, index) {
            return Some(song);
        }

        let ids = self.ids(source)?;
        if ids.get(index).is_none_or(SongId::is_empty) {
            debug!("no id known for entry {index} of {source}");
            return None;
        }

        let _guard = self.claim((source.clone(), index))?;

        let start = index / self.batch_size * self.batch_size;
        let end = (start + self.batch_size).min(ids.len());

        let fetch = self.fetch_page(source, &ids, start..end, cancel);
        let page = tokio::select! {
            biased;

            () = cancel.cancelled() => return None,
            result = tokio::time::timeout(self.timeout, fetch) => {
                match result.map_err(Error::from).and_then(|page| page) {
                    Ok(page) => page,
                    Err(e) => {
                        if !e.is_cancelled() {
                            warn!("loading entry {index} of {source} failed: {e}");
                        }
                        return None;
                    }
                }
            }
        };

        page.into_iter()
            .find(|(slot, _)| *slot == index)
            .map(|(_, song)| song)
    }

    /// Loads every remaining placeholder of the list `source`, page by page,
    /// handing each patched page to `on_page` as soon as it is in. Returns
    /// the number of entries patched.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` when `cancel` fires, or the first failed page.
    pub async fn hydrate(
        &self,
        source: &ViewSource,
        cancel: &CancellationToken,
        mut on_page: impl FnMut(&[(usize, Song)]) + Send,
    ) -> Result<usize> {
        let Some(ids) = self.ids(source) else {
            return Ok(0);
        };

        let mut patched = 0;
        let mut start = 0;
        while start < ids.len() {
            let end = (start + self.batch_size).min(ids.len());
            let missing = (start..end).any(|index| self.loaded(source, index).is_none());
            if missing {
                let page = self.fetch_page(source, &ids, start..end, cancel).await?;
                on_page(&page);
                patched += page.len();
            }
            start = end;
        }

        Ok(patched)
    }

    /// Parks a playback request for the entry at `index` of `source`,
    /// replacing any request parked before.
    pub fn park(&self, source: ViewSource, index: usize) {
        debug!("parking playback of entry {index} of {source}");
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some((source, index));
    }

    /// Takes the parked request if it is for this entry.
    pub fn take_pending(&self, source: &ViewSource, index: usize) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending
            .as_ref()
            .is_some_and(|(parked, slot)| parked == source && *slot == index)
        {
            *pending = None;
            true
        } else {
            false
        }
    }

    pub fn cancel_pending(&self) {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// The parked request, if any.
    #[must_use]
    pub fn pending(&self) -> Option<(ViewSource, usize)> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The loaded entry from the visible list, without I/O.
    fn loaded(&self, source: &ViewSource, index: usize) -> Option<Song> {
        let snapshot = self.view.snapshot().filter(|snapshot| &snapshot.source == source)?;
        snapshot
            .get(index)
            .filter(|song| !song.is_placeholder())
            .cloned()
    }

    fn claim(&self, slot: Slot) -> Option<InFlight<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(slot.clone()) {
            trace!("entry {} of {} already loading", slot.1, slot.0);
            return None;
        }

        Some(InFlight {
            set: &self.in_flight,
            slot,
        })
    }

    /// Fetches one page of details and patches it into the list.
    async fn fetch_page(
        &self,
        source: &ViewSource,
        ids: &[SongId],
        range: std::ops::Range<usize>,
        cancel: &CancellationToken,
    ) -> Result<Vec<(usize, Song)>> {
        self.space_batches(cancel).await?;

        let page = &ids[range.clone()];
        debug!(
            "loading entries {}..{} of {source}",
            range.start, range.end
        );
        let details = tokio::select! {
            biased;

            () = cancel.cancelled() => return Err(Error::cancelled("placeholder load cancelled")),
            details = self.catalog.get_song_details(page) => details?,
        };

        let mut loaded = Vec::new();
        for (offset, id) in page.iter().enumerate() {
            let Some(detail) = details.iter().find(|detail| &detail.id == id) else {
                continue;
            };

            let slot = range.start + offset;
            let mut song = detail.clone();
            song.view_source = Some(source.clone());
            song.slot = Some(slot);

            if !self.view.patch_placeholder(source, slot, &song) {
                trace!("{source} no longer shown, entry {slot} not patched");
            }
            loaded.push((slot, song));
        }

        Ok(loaded)
    }

    /// Keeps consecutive page fetches apart. The wait is cancellable.
    async fn space_batches(&self, cancel: &CancellationToken) -> Result<()> {
        let wait = {
            let mut next_batch = self.next_batch.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            let slot = next_batch.filter(|slot| *slot > now).unwrap_or(now);
            *next_batch = Some(slot + self.batch_spacing);
            slot - now
        };

        if !wait.is_zero() {
            tokio::select! {
                biased;

                () = cancel.cancelled() => return Err(Error::cancelled("placeholder load cancelled")),
                () = tokio::time::sleep(wait) => {}
            }
        }
        Ok(())
    }
}
