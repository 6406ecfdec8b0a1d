//! Playback queue with mode-aware navigation and an injection chain.
//!
//! The queue holds the songs of one list in their original order and a
//! cursor into it. Navigation only ever moves the cursor; the stored order
//! is changed by explicit operations alone (replacing the queue, appending
//! radio songs, removing songs that turned out unavailable).
//!
//! Songs requested to "play next" form the injection chain. The chain has
//! strict priority over the main list. Each injection is consumed exactly
//! once: taking it pops it, and it is never revisited. An injection
//! requested while the queue has no cursor waits in the pending slot.
//!
//! # Modes
//!
//! * [`PlayMode::Sequential`] stops at either end of the list
//! * [`PlayMode::Loop`] wraps around and never reports a boundary
//! * [`PlayMode::LoopOne`] repeats the current song on automatic advance and
//!   behaves like `Loop` on manual navigation
//! * [`PlayMode::Random`] walks a shuffled order that is regenerated once
//!   exhausted. The order must be prepared with
//!   [`PlaybackQueue::prepare_shuffle`] before moving

use std::{collections::VecDeque, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    song::{Availability, Song, SongId, ViewSource},
    view::ViewSnapshot,
};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "binary", derive(clap::ValueEnum))]
pub enum PlayMode {
    #[default]
    Sequential,
    Loop,
    LoopOne,
    Random,
}

impl fmt::Display for PlayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Loop => write!(f, "loop"),
            Self::LoopOne => write!(f, "loop one"),
            Self::Random => write!(f, "random"),
        }
    }
}

impl FromStr for PlayMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mode = match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "sequential" => Self::Sequential,
            "loop" => Self::Loop,
            "loop_one" | "repeat_one" => Self::LoopOne,
            "random" | "shuffle" => Self::Random,
            _ => return Err(Error::invalid_argument(format!("unknown play mode: {s}"))),
        };

        Ok(mode)
    }
}

/// Where the song of a [`MoveResult`] came from.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Route {
    /// Nothing was selected.
    #[default]
    None,
    Queue,
    /// Back from an injection to the queue song it interrupted.
    ReturnToQueue,
    Injection,
    /// An injection requested before the queue had a cursor.
    PendingInjection,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Queue => write!(f, "queue"),
            Self::ReturnToQueue => write!(f, "return"),
            Self::Injection => write!(f, "injection"),
            Self::PendingInjection => write!(f, "pending"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MoveResult {
    pub queue_empty: bool,
    pub reached_boundary: bool,
    pub song: Option<Song>,
    pub route: Route,
    pub queue_index: Option<usize>,
    pub injection_index: Option<usize>,
    /// The move wrapped around the end of the list or shuffle order.
    pub wrapped: bool,
}

impl MoveResult {
    fn empty() -> Self {
        Self {
            queue_empty: true,
            ..Default::default()
        }
    }

    fn boundary() -> Self {
        Self {
            reached_boundary: true,
            ..Default::default()
        }
    }

    fn queued(song: Song, index: usize, route: Route) -> Self {
        Self {
            song: Some(song),
            route,
            queue_index: Some(index),
            ..Default::default()
        }
    }

    fn injected(song: Song, index: usize, route: Route) -> Self {
        Self {
            song: Some(song),
            route,
            injection_index: Some(index),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn has_song(&self) -> bool {
        self.song.is_some()
    }

    /// Identity of the candidate for loop detection: the song ID, or the
    /// route and index for placeholders.
    #[must_use]
    pub fn attempt_key(&self) -> Option<String> {
        let song = self.song.as_ref()?;
        if !song.is_placeholder() {
            return Some(format!("id:{}", song.id));
        }

        let index = match self.route {
            Route::Injection | Route::PendingInjection => self.injection_index,
            _ => self.queue_index,
        }?;
        Some(format!("{}:{index}", self.route))
    }
}

/// Saved navigation position, see [`PlaybackQueue::restore`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cursor {
    index: Option<usize>,
    anchor: Option<SongId>,
    shuffle_pos: Option<usize>,
    playing_injection: Option<Song>,
}

/// Queue state for persistence collaborators.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub source: Option<ViewSource>,
    pub songs: Vec<SongId>,
    pub index: Option<usize>,
    pub injections: Vec<SongId>,
    pub pending: Option<SongId>,
}

#[derive(Clone, Debug, Default)]
pub struct PlaybackQueue {
    source: Option<ViewSource>,
    songs: Vec<Song>,
    index: Option<usize>,

    injections: VecDeque<Song>,
    pending: Option<Song>,
    playing_injection: Option<Song>,
    injections_taken: usize,

    shuffle: Vec<usize>,
    shuffle_pos: Option<usize>,
    shuffle_ready: bool,
}

impl PlaybackQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the main list. Injections survive, the shuffle order does
    /// not.
    pub fn set_queue(&mut self, source: Option<ViewSource>, songs: Vec<Song>, index: Option<usize>) {
        debug!(
            "queue set to {} songs from {}",
            songs.len(),
            source.as_ref().map_or("nowhere", ViewSource::as_str)
        );
        self.index = index.filter(|index| *index < songs.len());
        self.songs = songs;
        self.source = source;
        self.playing_injection = None;
        self.invalidate_shuffle();
    }

    /// Positions the queue on a song the user picked.
    ///
    /// A song shown in `view` rebuilds the queue from that view. A song
    /// already queued only moves the cursor. Anything else is played as an
    /// injection without touching the queue.
    pub fn select(&mut self, song: &Song, view: Option<&ViewSnapshot>) -> MoveResult {
        if let Some(view) = view {
            if let Some(index) = position_of(view.songs.as_slice(), song) {
                if self.source.as_ref() != Some(&view.source) || self.songs.len() != view.songs.len() {
                    self.set_queue(Some(view.source.clone()), view.songs.to_vec(), Some(index));
                } else {
                    self.index = Some(index);
                    self.playing_injection = None;
                    self.sync_shuffle();
                }
                return MoveResult::queued(self.songs[index].clone(), index, Route::Queue);
            }
        }

        if let Some(index) = position_of(&self.songs, song) {
            self.index = Some(index);
            self.playing_injection = None;
            self.sync_shuffle();
            return MoveResult::queued(self.songs[index].clone(), index, Route::Queue);
        }

        let index = self.injections_taken;
        self.injections_taken += 1;
        self.playing_injection = Some(song.clone());
        MoveResult::injected(song.clone(), index, Route::Injection)
    }

    /// Queues `song` to play after the current one.
    pub fn insert_next(&mut self, song: Song) -> Route {
        if !song.is_placeholder() {
            self.injections.retain(|queued| queued.id != song.id);
        }

        if self.index.is_none() && self.playing_injection.is_none() && self.pending.is_none() {
            debug!("{song} pending until the queue has a position");
            self.pending = Some(song);
            Route::PendingInjection
        } else {
            debug!("{song} injected at position {}", self.injections.len());
            self.injections.push_back(song);
            Route::Injection
        }
    }

    /// Moves to the next song.
    ///
    /// # Errors
    ///
    /// Returns `FailedPrecondition` in random mode when the shuffle order
    /// was not prepared.
    pub fn move_next(&mut self, mode: PlayMode, is_manual: bool) -> Result<MoveResult> {
        if let Some(song) = self.pending.take() {
            return Ok(self.take_injection(song, Route::PendingInjection));
        }
        if let Some(song) = self.injections.pop_front() {
            return Ok(self.take_injection(song, Route::Injection));
        }

        if mode == PlayMode::LoopOne && !is_manual {
            if let Some(song) = self.playing_injection.clone() {
                let index = self.injections_taken.saturating_sub(1);
                return Ok(MoveResult::injected(song, index, Route::Injection));
            }
            if let Some(index) = self.index {
                return Ok(MoveResult::queued(self.songs[index].clone(), index, Route::Queue));
            }
        }

        if self.songs.is_empty() {
            return Ok(MoveResult::empty());
        }

        if mode == PlayMode::Random {
            return self.shuffle_step(true);
        }

        let next = self.index.map_or(0, |index| index + 1);
        let (next, wrapped) = if next < self.songs.len() {
            (next, false)
        } else if mode == PlayMode::Sequential {
            return Ok(MoveResult::boundary());
        } else {
            (0, true)
        };

        Ok(self.move_to(next, wrapped))
    }

    /// Moves to the previous song.
    ///
    /// # Errors
    ///
    /// Returns `FailedPrecondition` in random mode when the shuffle order
    /// was not prepared.
    pub fn move_previous(&mut self, mode: PlayMode, is_manual: bool) -> Result<MoveResult> {
        if self.playing_injection.is_some() {
            if let Some(index) = self.index {
                self.playing_injection = None;
                return Ok(MoveResult::queued(
                    self.songs[index].clone(),
                    index,
                    Route::ReturnToQueue,
                ));
            }
        }

        if self.songs.is_empty() {
            return Ok(MoveResult::empty());
        }

        if mode == PlayMode::LoopOne && !is_manual {
            if let Some(index) = self.index {
                return Ok(MoveResult::queued(self.songs[index].clone(), index, Route::Queue));
            }
        }

        if mode == PlayMode::Random {
            return self.shuffle_step(false);
        }

        let (previous, wrapped) = match self.index {
            Some(index) if index > 0 => (index - 1, false),
            _ if mode == PlayMode::Sequential => return Ok(MoveResult::boundary()),
            _ => (self.songs.len() - 1, true),
        };

        Ok(self.move_to(previous, wrapped))
    }

    /// Synchronizes the cursor with the song that is actually playing.
    /// Returns `false` when the song is neither queued nor the injection
    /// being played.
    pub fn advance_for_playback(&mut self, song: &Song) -> bool {
        if let Some(index) = position_of(&self.songs, song) {
            self.index = Some(index);
            self.playing_injection = None;
            self.sync_shuffle();
            return true;
        }

        self.playing_injection
            .as_ref()
            .is_some_and(|playing| same_song(playing, song))
    }

    /// Removes a song from the queue, the injection chain and the pending
    /// slot. The cursor moves back so that the next move lands on the song
    /// that followed the removed one.
    pub fn remove_song_by_id(&mut self, id: &SongId) -> bool {
        if id.is_empty() {
            return false;
        }

        let mut removed = false;
        while let Some(position) = self.songs.iter().position(|song| &song.id == id) {
            self.songs.remove(position);
            removed = true;

            self.index = match self.index {
                Some(index) if position < index => Some(index - 1),
                Some(index) if position == index => index.checked_sub(1),
                other => other,
            };
            self.remove_from_shuffle(position);
        }
        if self.songs.is_empty() {
            self.index = None;
        } else if let Some(index) = self.index {
            self.index = Some(index.min(self.songs.len() - 1));
        }

        let before = self.injections.len();
        self.injections.retain(|song| &song.id != id);
        removed |= self.injections.len() != before;

        if self.pending.as_ref().is_some_and(|song| &song.id == id) {
            self.pending = None;
            removed = true;
        }
        if self.playing_injection.as_ref().is_some_and(|song| &song.id == id) {
            self.playing_injection = None;
            removed = true;
        }

        if removed {
            debug!("removed {id} from the queue");
        }
        removed
    }

    /// Looks ahead for the next song that is not known to be unavailable,
    /// without moving.
    #[must_use]
    pub fn predict_next_available(&self, mode: PlayMode, max_attempts: usize) -> Option<Song> {
        let mut lookahead = self.clone();
        for _ in 0..max_attempts {
            let step = lookahead.move_next(mode, false).ok()?;
            if mode == PlayMode::Random && step.wrapped {
                return None;
            }

            let song = step.song?;
            if !song.is_placeholder() && song.availability != Availability::Unavailable {
                return Some(song);
            }
        }

        None
    }

    /// Builds the shuffle order, starting from the current song.
    pub fn prepare_shuffle(&mut self) {
        self.shuffle = self.shuffled_order();
        self.shuffle_pos = self.index.map(|_| 0);
        self.shuffle_ready = true;
        trace!("shuffled {} songs", self.shuffle.len());
    }

    #[must_use]
    pub fn is_shuffle_ready(&self) -> bool {
        self.shuffle_ready
    }

    /// Appends songs that are not queued yet. Returns how many were added.
    pub fn append(&mut self, songs: Vec<Song>) -> usize {
        let start = self.songs.len();
        for song in songs {
            if song.is_placeholder() || self.songs.iter().any(|queued| queued.id == song.id) {
                continue;
            }
            self.songs.push(song);
        }

        let added = self.songs.len() - start;
        if self.shuffle_ready && added > 0 {
            let mut fresh: Vec<usize> = (start..self.songs.len()).collect();
            fastrand::shuffle(&mut fresh);
            self.shuffle.extend(fresh);
        }
        added
    }

    /// Replaces stale copies of `song` with its newer revision.
    pub fn update_song(&mut self, song: &Song) -> bool {
        let mut updated = false;
        let copies = self
            .songs
            .iter_mut()
            .chain(self.injections.iter_mut())
            .chain(self.pending.iter_mut())
            .chain(self.playing_injection.iter_mut());
        for copy in copies {
            updated |= copy.adopt_if_newer(song);
        }
        updated
    }

    /// Replaces the placeholder for `slot` of the list `source`.
    pub fn patch(&mut self, source: &ViewSource, slot: usize, song: &Song) -> bool {
        let matches = |queued: &Song| {
            queued.is_placeholder()
                && queued.slot == Some(slot)
                && queued.view_source.as_ref() == Some(source)
        };

        let mut patched = false;
        let copies = self
            .songs
            .iter_mut()
            .chain(self.injections.iter_mut())
            .chain(self.pending.iter_mut())
            .chain(self.playing_injection.iter_mut());
        for copy in copies.filter(|queued| matches(queued)) {
            *copy = song.clone();
            patched = true;
        }
        patched
    }

    /// Saves the navigation position.
    #[must_use]
    pub fn cursor(&self) -> Cursor {
        Cursor {
            index: self.index,
            anchor: self
                .index
                .and_then(|index| self.songs.get(index))
                .filter(|song| !song.is_placeholder())
                .map(|song| song.id.clone()),
            shuffle_pos: self.shuffle_pos,
            playing_injection: self.playing_injection.clone(),
        }
    }

    /// Returns to a saved position. The saved song is looked up again in
    /// case songs were removed in between.
    pub fn restore(&mut self, cursor: Cursor) {
        let anchored = cursor
            .anchor
            .as_ref()
            .and_then(|id| self.songs.iter().position(|song| &song.id == id));

        self.index = match anchored {
            Some(index) => Some(index),
            None if self.songs.is_empty() => None,
            None => cursor.index.map(|index| index.min(self.songs.len() - 1)),
        };
        self.playing_injection = cursor.playing_injection;

        if anchored.is_some() {
            self.sync_shuffle();
        } else {
            self.shuffle_pos = cursor
                .shuffle_pos
                .filter(|_| !self.shuffle.is_empty())
                .map(|pos| pos.min(self.shuffle.len() - 1));
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            source: self.source.clone(),
            songs: self.songs.iter().map(|song| song.id.clone()).collect(),
            index: self.index,
            injections: self.injections.iter().map(|song| song.id.clone()).collect(),
            pending: self.pending.as_ref().map(|song| song.id.clone()),
        }
    }

    /// Bound on candidates a manual skip may try before giving up.
    #[must_use]
    pub fn manual_attempt_limit(&self) -> usize {
        (self.songs.len() + self.injections.len() + usize::from(self.pending.is_some()) + 3).max(6)
    }

    /// The song under the cursor, or the injection being played.
    #[must_use]
    pub fn current(&self) -> Option<&Song> {
        self.playing_injection
            .as_ref()
            .or_else(|| self.index.and_then(|index| self.songs.get(index)))
    }

    #[must_use]
    pub fn source(&self) -> Option<&ViewSource> {
        self.source.as_ref()
    }

    #[must_use]
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    #[must_use]
    pub fn songs(&self) -> &[Song] {
        &self.songs
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.songs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    #[must_use]
    pub fn injection_len(&self) -> usize {
        self.injections.len()
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Songs after the cursor.
    #[must_use]
    pub fn remaining(&self) -> usize {
        match self.index {
            Some(index) => self.songs.len().saturating_sub(index + 1),
            None => self.songs.len(),
        }
    }

    fn take_injection(&mut self, song: Song, route: Route) -> MoveResult {
        let index = self.injections_taken;
        self.injections_taken += 1;
        self.playing_injection = Some(song.clone());
        MoveResult::injected(song, index, route)
    }

    fn move_to(&mut self, index: usize, wrapped: bool) -> MoveResult {
        self.index = Some(index);
        self.playing_injection = None;
        self.sync_shuffle();

        let mut result = MoveResult::queued(self.songs[index].clone(), index, Route::Queue);
        result.wrapped = wrapped;
        result
    }

    fn shuffle_step(&mut self, forward: bool) -> Result<MoveResult> {
        if !self.shuffle_ready || self.shuffle.len() != self.songs.len() {
            return Err(Error::failed_precondition("shuffle order not prepared"));
        }

        let last = self.shuffle.len() - 1;
        let (pos, wrapped) = match (self.shuffle_pos, forward) {
            (None, true) => (0, false),
            (Some(pos), true) if pos < last => (pos + 1, false),
            (Some(_), true) => {
                self.shuffle = self.shuffled_order_avoiding(self.index);
                (0, true)
            }
            (Some(pos), false) if pos > 0 => (pos - 1, false),
            (_, false) => (last, true),
        };

        self.shuffle_pos = Some(pos);
        let index = self.shuffle[pos];
        self.index = Some(index);
        self.playing_injection = None;

        let mut result = MoveResult::queued(self.songs[index].clone(), index, Route::Queue);
        result.wrapped = wrapped;
        Ok(result)
    }

    /// Random permutation of the queue with the current song first.
    fn shuffled_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.songs.len()).collect();
        fastrand::shuffle(&mut order);
        if let Some(index) = self.index {
            if let Some(pos) = order.iter().position(|i| *i == index) {
                order.swap(0, pos);
            }
        }
        order
    }

    /// Random permutation that does not start with `avoid`, so a new round
    /// does not repeat the song that ended the previous one.
    fn shuffled_order_avoiding(&self, avoid: Option<usize>) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.songs.len()).collect();
        fastrand::shuffle(&mut order);
        if order.len() > 1 && order.first() == avoid.as_ref() {
            let swap_with = fastrand::usize(1..order.len());
            order.swap(0, swap_with);
        }
        order
    }

    fn sync_shuffle(&mut self) {
        if let Some(index) = self.index {
            if let Some(pos) = self.shuffle.iter().position(|i| *i == index) {
                self.shuffle_pos = Some(pos);
            }
        }
    }

    fn remove_from_shuffle(&mut self, removed: usize) {
        let Some(order_pos) = self.shuffle.iter().position(|i| *i == removed) else {
            return;
        };
        self.shuffle.remove(order_pos);
        for index in &mut self.shuffle {
            if *index > removed {
                *index -= 1;
            }
        }

        self.shuffle_pos = match self.shuffle_pos {
            Some(pos) if order_pos <= pos => pos.checked_sub(1),
            other => other,
        };
    }

    fn invalidate_shuffle(&mut self) {
        self.shuffle.clear();
        self.shuffle_pos = None;
        self.shuffle_ready = false;
    }
}

fn position_of(songs: &[Song], song: &Song) -> Option<usize> {
    songs.iter().position(|candidate| same_song(candidate, song))
}

/// Equal catalog identity, or the same placeholder slot of the same list.
fn same_song(a: &Song, b: &Song) -> bool {
    if a.is_placeholder() || b.is_placeholder() {
        a.is_placeholder()
            && b.is_placeholder()
            && a.slot.is_some()
            && a.slot == b.slot
            && a.view_source == b.view_source
    } else {
        a.id == b.id
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn songs(ids: &[&str]) -> Vec<Song> {
        ids.iter().map(|id| Song::new(*id, format!("Song {id}"))).collect()
    }

    fn queue(ids: &[&str], index: Option<usize>) -> PlaybackQueue {
        let mut queue = PlaybackQueue::new();
        queue.set_queue(Some(ViewSource::from("playlist:1")), songs(ids), index);
        queue
    }

    fn id(result: &MoveResult) -> &str {
        result.song.as_ref().map_or("", |song| song.id.as_str())
    }

    #[test]
    fn sequential_reaches_boundary_after_n_minus_one() {
        let mut queue = queue(&["a", "b", "c", "d"], Some(0));
        let mut moves = 0;
        loop {
            let result = queue.move_next(PlayMode::Sequential, false).unwrap();
            if result.reached_boundary {
                break;
            }
            assert!(result.has_song());
            moves += 1;
        }
        assert_eq!(moves, 3);
        assert_eq!(queue.index(), Some(3));
    }

    #[test]
    fn loop_never_reports_boundary() {
        let mut queue = queue(&["a", "b", "c"], Some(0));
        for _ in 0..10 {
            let result = queue.move_next(PlayMode::Loop, true).unwrap();
            assert!(!result.reached_boundary);
            assert!(result.has_song());
        }
        for _ in 0..10 {
            assert!(!queue.move_previous(PlayMode::Loop, true).unwrap().reached_boundary);
        }
    }

    #[test]
    fn loop_one_repeats_unless_manual() {
        let mut queue = queue(&["a", "b"], Some(0));
        assert_eq!(id(&queue.move_next(PlayMode::LoopOne, false).unwrap()), "a");
        assert_eq!(id(&queue.move_next(PlayMode::LoopOne, true).unwrap()), "b");
        assert_eq!(id(&queue.move_next(PlayMode::LoopOne, true).unwrap()), "a");
    }

    #[test]
    fn navigation_keeps_stored_order() {
        let mut queue = queue(&["a", "b", "c"], Some(1));
        queue.move_next(PlayMode::Loop, true).unwrap();
        queue.move_previous(PlayMode::Loop, true).unwrap();
        queue.move_previous(PlayMode::Loop, true).unwrap();
        assert_eq!(queue.snapshot().songs, vec![SongId::from("a"), SongId::from("b"), SongId::from("c")]);
    }

    #[test]
    fn injections_take_priority_and_are_consumed_once() {
        let mut queue = queue(&["a", "b", "c"], Some(0));
        queue.insert_next(Song::new("x", "X"));
        queue.insert_next(Song::new("y", "Y"));

        let first = queue.move_next(PlayMode::Sequential, false).unwrap();
        assert_eq!((id(&first), first.route), ("x", Route::Injection));
        let second = queue.move_next(PlayMode::Sequential, false).unwrap();
        assert_eq!((id(&second), second.route), ("y", Route::Injection));
        assert_eq!(second.injection_index, Some(1));

        let back = queue.move_next(PlayMode::Sequential, false).unwrap();
        assert_eq!((id(&back), back.route), ("b", Route::Queue));
        assert_eq!(queue.injection_len(), 0);
    }

    #[test]
    fn previous_from_injection_returns_to_queue() {
        let mut queue = queue(&["a", "b"], Some(1));
        queue.insert_next(Song::new("x", "X"));
        queue.move_next(PlayMode::Sequential, true).unwrap();

        let back = queue.move_previous(PlayMode::Sequential, true).unwrap();
        assert_eq!((id(&back), back.route), ("b", Route::ReturnToQueue));
        let before = queue.move_previous(PlayMode::Sequential, true).unwrap();
        assert_eq!(id(&before), "a");
    }

    #[test]
    fn injection_without_cursor_is_pending() {
        let mut queue = queue(&["a", "b"], None);
        assert_eq!(queue.insert_next(Song::new("x", "X")), Route::PendingInjection);
        assert!(queue.has_pending());

        let result = queue.move_next(PlayMode::Sequential, false).unwrap();
        assert_eq!((id(&result), result.route), ("x", Route::PendingInjection));
        assert!(!queue.has_pending());
        assert_eq!(id(&queue.move_next(PlayMode::Sequential, false).unwrap()), "a");
    }

    #[test]
    fn empty_queue_is_distinct_from_boundary() {
        let mut queue = PlaybackQueue::new();
        let result = queue.move_next(PlayMode::Sequential, true).unwrap();
        assert!(result.queue_empty);
        assert!(!result.reached_boundary);
        assert!(queue.move_previous(PlayMode::Loop, true).unwrap().queue_empty);
    }

    #[test]
    fn random_requires_prepared_shuffle() {
        let mut queue = queue(&["a", "b", "c"], Some(0));
        assert!(queue.move_next(PlayMode::Random, true).is_err());

        queue.prepare_shuffle();
        let mut seen = HashSet::new();
        for _ in 0..2 {
            let result = queue.move_next(PlayMode::Random, false).unwrap();
            assert!(!result.reached_boundary);
            seen.insert(id(&result).to_owned());
        }
        assert_eq!(seen.len(), 2);
        assert!(!seen.contains("a"));

        let next_round = queue.move_next(PlayMode::Random, false).unwrap();
        assert!(next_round.wrapped);
        assert!(next_round.has_song());
    }

    #[test]
    fn removing_current_song_keeps_following_song_next() {
        let mut queue = queue(&["a", "b", "c"], Some(1));
        assert!(queue.remove_song_by_id(&SongId::from("b")));
        assert_eq!(queue.index(), Some(0));
        assert_eq!(id(&queue.move_next(PlayMode::Sequential, false).unwrap()), "c");

        assert!(!queue.remove_song_by_id(&SongId::from("b")));
    }

    #[test]
    fn removal_adjusts_shuffle_order() {
        let mut queue = queue(&["a", "b", "c", "d"], Some(0));
        queue.prepare_shuffle();
        queue.remove_song_by_id(&SongId::from("c"));

        let mut seen = HashSet::new();
        for _ in 0..3 {
            let result = queue.move_next(PlayMode::Random, false).unwrap();
            if result.wrapped {
                break;
            }
            seen.insert(id(&result).to_owned());
        }
        assert!(!seen.contains("c"));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn restore_follows_anchor_across_removal() {
        let mut queue = queue(&["a", "b", "c", "d"], Some(2));
        let saved = queue.cursor();
        queue.move_previous(PlayMode::Sequential, true).unwrap();
        queue.remove_song_by_id(&SongId::from("b"));
        queue.restore(saved);

        assert_eq!(queue.current().unwrap().id.as_str(), "c");
        assert_eq!(id(&queue.move_previous(PlayMode::Sequential, true).unwrap()), "a");
    }

    #[test]
    fn predicts_next_available_song() {
        let mut list = songs(&["a", "b", "c"]);
        list[1].availability = Availability::Unavailable;
        let mut queue = PlaybackQueue::new();
        queue.set_queue(None, list, Some(0));

        let predicted = queue.predict_next_available(PlayMode::Sequential, 10).unwrap();
        assert_eq!(predicted.id.as_str(), "c");
        assert_eq!(queue.index(), Some(0));
        assert!(queue.predict_next_available(PlayMode::Random, 10).is_none());
    }

    #[test]
    fn select_rebuilds_from_view() {
        let view = ViewSnapshot::new(ViewSource::from("album:9"), songs(&["p", "q", "r"]));
        let mut queue = queue(&["a"], Some(0));

        let picked = queue.select(&Song::new("q", "Q"), Some(&view));
        assert_eq!(picked.queue_index, Some(1));
        assert_eq!(queue.source(), Some(&ViewSource::from("album:9")));
        assert_eq!(queue.len(), 3);

        let outside = queue.select(&Song::new("z", "Z"), Some(&view));
        assert_eq!(outside.route, Route::Injection);
        assert_eq!(queue.index(), Some(1));
        assert_eq!(id(&queue.move_next(PlayMode::Sequential, false).unwrap()), "r");
    }

    #[test]
    fn attempt_keys() {
        let mut placeholder = MoveResult::queued(
            Song::placeholder(ViewSource::from("playlist:1"), 4),
            4,
            Route::Queue,
        );
        assert_eq!(placeholder.attempt_key().unwrap(), "queue:4");
        placeholder.song = Some(Song::new("7", "Seven"));
        assert_eq!(placeholder.attempt_key().unwrap(), "id:7");
        assert!(MoveResult::boundary().attempt_key().is_none());
    }

    #[test]
    fn manual_attempt_limit_is_floored() {
        assert_eq!(queue(&["a"], Some(0)).manual_attempt_limit(), 6);
        assert_eq!(queue(&["a", "b", "c", "d", "e"], Some(0)).manual_attempt_limit(), 8);
    }

    #[test]
    fn manual_attempt_limit_counts_pending_song() {
        let mut queue = queue(&["a", "b", "c", "d", "e"], None);
        assert_eq!(queue.manual_attempt_limit(), 8);
        assert_eq!(queue.insert_next(Song::new("x", "X")), Route::PendingInjection);
        assert_eq!(queue.manual_attempt_limit(), 9);
    }

    #[test]
    fn parses_modes() {
        assert_eq!("loop-one".parse::<PlayMode>().unwrap(), PlayMode::LoopOne);
        assert_eq!("Shuffle".parse::<PlayMode>().unwrap(), PlayMode::Random);
        assert!("sideways".parse::<PlayMode>().is_err());
    }
}
