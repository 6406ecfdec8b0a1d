//! Interface to the list layer that displays songs.
//!
//! The list layer owns the visible list. The engine reads snapshots of it and
//! sends it two kinds of notifications: availability changes for a song, and
//! placeholders that were resolved in place.

use std::sync::Arc;

use crate::song::{Availability, Song, SongId, ViewSource};

/// Immutable copy of the currently visible list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ViewSnapshot {
    pub source: ViewSource,
    pub songs: Arc<Vec<Song>>,
}

impl ViewSnapshot {
    #[must_use]
    pub fn new(source: ViewSource, songs: Vec<Song>) -> Self {
        Self {
            source,
            songs: Arc::new(songs),
        }
    }

    #[must_use]
    pub fn position(&self, id: &SongId) -> Option<usize> {
        if id.is_empty() {
            return None;
        }
        self.songs.iter().position(|song| &song.id == id)
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Song> {
        self.songs.get(index)
    }
}

pub trait ListView: Send + Sync {
    /// The currently visible list, if any.
    fn snapshot(&self) -> Option<ViewSnapshot>;

    /// Replaces the placeholder at `index` of the list tagged `source`.
    /// Returns `false` when that list is no longer shown.
    fn patch_placeholder(&self, source: &ViewSource, index: usize, song: &Song) -> bool;

    /// Refreshes any visible availability indicator of `id`.
    fn refresh_availability(&self, id: &SongId, availability: Availability);
}
