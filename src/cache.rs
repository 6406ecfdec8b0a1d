//! Bounded cache of the latest resolved copy of each song.

use std::{
    num::NonZeroUsize,
    sync::{Mutex, PoisonError},
};

use lru::LruCache;

use crate::song::{Song, SongId};

/// Least-recently-used cache keyed by song ID.
///
/// A put never replaces an entry with an older revision, so a slow
/// background resolution cannot overwrite a newer result.
#[derive(Debug)]
pub struct SongCache {
    songs: Mutex<LruCache<SongId, Song>>,
}

impl SongCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            songs: Mutex::new(LruCache::new(capacity)),
        }
    }

    #[must_use]
    pub fn get(&self, id: &SongId) -> Option<Song> {
        self.songs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Stores `song` unless a newer revision is cached. Returns whether it
    /// was stored.
    pub fn put(&self, song: Song) -> bool {
        if song.is_placeholder() {
            return false;
        }

        let mut songs = self.songs.lock().unwrap_or_else(PoisonError::into_inner);
        if songs
            .peek(&song.id)
            .is_some_and(|cached| cached.revision > song.revision)
        {
            return false;
        }

        let id = song.id.clone();
        if let Some((evicted, _)) = songs.push(id.clone(), song) {
            if evicted != id {
                trace!("evicting {evicted} from song cache");
            }
        }
        true
    }

    pub fn remove(&self, id: &SongId) -> Option<Song> {
        self.songs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.songs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
