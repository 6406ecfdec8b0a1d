//! In-memory collaborators backed by a TOML catalog fixture.
//!
//! The binary runs against these instead of a streaming service, and the
//! scenario tests use them to script catalog behavior: missing resources,
//! paid albums, trial fragments, transient failures and latency.
//!
//! # Format
//!
//! ```toml
//! [[songs]]
//! id = "1"
//! name = "One"
//! artists = ["Artist"]
//! duration = 240
//! url = "https://cdn.example.com/1.flac"
//! size = 30000000
//!
//! [[songs]]
//! id = "2"
//! name = "Two"
//! missing = true
//! unblock = { url = "https://mirror.example.com/2.mp3", source = "mirror" }
//!
//! [[views]]
//! source = "playlist:1"
//! songs = ["1", "2"]
//! ```

use std::{
    collections::{HashMap, HashSet, VecDeque},
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use http::HeaderMap;
use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    catalog::{Catalog, RadioFeed, UrlInfo},
    error::{Error, Result},
    http::ContentLength,
    player::{AudioEngine, Collaborators},
    quality::{QualityLevel, QualityUrlInfo, TrialWindow},
    report::{PlaybackSession, ReportSink, SessionEnd},
    song::{Availability, Song, SongId, ViewSource},
    unblock::{UnblockMatch, Unblocker},
    view::{ListView, ViewSnapshot},
};

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Fixture {
    pub songs: Vec<FixtureSong>,
    pub views: Vec<FixtureView>,
    pub radio: Option<FixtureRadio>,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FixtureSong {
    pub id: SongId,
    pub name: String,
    pub artists: Vec<String>,
    pub album: String,
    pub album_id: String,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub duration: Duration,

    /// Availability the list layer starts out with.
    pub availability: Availability,
    /// Answer of the batch availability check.
    pub available: bool,
    /// URL requests fail with "resource not found".
    pub missing: bool,
    /// URL requests fail with "paid album not purchased".
    pub paid: bool,

    pub url: Option<Url>,
    /// Level served, when lower than the level requested.
    pub level: Option<QualityLevel>,
    pub size: u64,
    pub bitrate: u64,
    pub trial: Option<TrialWindow>,
    /// Size disclosed by the stream host.
    pub content_length: Option<u64>,

    pub unblock: Option<FixtureUnblock>,

    /// Delay of every URL request.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub latency: Duration,
    /// Number of URL requests that fail transiently before one succeeds.
    pub fail_times: u32,
}

impl Default for FixtureSong {
    fn default() -> Self {
        Self {
            id: SongId::default(),
            name: String::new(),
            artists: Vec::new(),
            album: String::new(),
            album_id: String::new(),
            duration: Duration::ZERO,
            availability: Availability::Unknown,
            available: true,
            missing: false,
            paid: false,
            url: None,
            level: None,
            size: 0,
            bitrate: 0,
            trial: None,
            content_length: None,
            unblock: None,
            latency: Duration::ZERO,
            fail_times: 0,
        }
    }
}

impl FixtureSong {
    #[must_use]
    pub fn to_song(&self) -> Song {
        Song {
            id: self.id.clone(),
            name: self.name.clone(),
            artists: self.artists.clone(),
            album: self.album.clone(),
            album_id: self.album_id.clone(),
            duration: self.duration,
            availability: self.availability,
            ..Song::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct FixtureUnblock {
    pub url: Url,
    #[serde(default)]
    pub source: String,
    pub size: Option<u64>,
    pub bitrate: Option<u64>,
    pub duration_ms: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FixtureView {
    pub source: ViewSource,
    pub songs: Vec<SongId>,
    /// Show the list as placeholders that load lazily.
    pub lazy: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FixtureRadio {
    pub source: ViewSource,
    /// Songs handed out by consecutive fetches.
    pub batches: Vec<Vec<SongId>>,
}

impl Fixture {
    /// Reads a fixture file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parses a fixture.
    ///
    /// # Errors
    ///
    /// Returns an error if `contents` is not valid TOML, or a view or radio
    /// batch names an unknown song.
    pub fn parse(contents: &str) -> Result<Self> {
        let fixture: Self = toml::from_str(contents)?;

        let known: HashSet<&SongId> = fixture.songs.iter().map(|song| &song.id).collect();
        let referenced = fixture
            .views
            .iter()
            .flat_map(|view| view.songs.iter())
            .chain(fixture.radio.iter().flat_map(|radio| radio.batches.iter().flatten()));
        for id in referenced {
            if !known.contains(id) {
                return Err(Error::invalid_argument(format!("unknown song {id}")));
            }
        }

        Ok(fixture)
    }

    #[must_use]
    pub fn song(&self, id: &SongId) -> Option<Song> {
        self.songs
            .iter()
            .find(|song| &song.id == id)
            .map(FixtureSong::to_song)
    }

    #[must_use]
    pub fn view(&self, source: &ViewSource) -> Option<&FixtureView> {
        self.views.iter().find(|view| &view.source == source)
    }

    /// Songs of a view as the list layer would show them.
    #[must_use]
    pub fn view_songs(&self, view: &FixtureView) -> Vec<Song> {
        view.songs
            .iter()
            .enumerate()
            .map(|(slot, id)| {
                if view.lazy {
                    Song::placeholder(view.source.clone(), slot)
                } else {
                    let mut song = self.song(id).unwrap_or_else(|| Song::new(id.clone(), ""));
                    song.view_source = Some(view.source.clone());
                    song
                }
            })
            .collect()
    }
}

/// Catalog and personal radio served from a fixture.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    songs: HashMap<SongId, FixtureSong>,
    failures: Mutex<HashMap<SongId, u32>>,
    radio_source: ViewSource,
    radio: Mutex<VecDeque<Vec<SongId>>>,

    pub check_calls: AtomicUsize,
    pub url_calls: AtomicUsize,
    pub detail_calls: AtomicUsize,
}

impl MemoryCatalog {
    #[must_use]
    pub fn new(fixture: &Fixture) -> Self {
        let radio = fixture.radio.clone().unwrap_or_default();
        Self {
            songs: fixture
                .songs
                .iter()
                .map(|song| (song.id.clone(), song.clone()))
                .collect(),
            failures: Mutex::new(
                fixture
                    .songs
                    .iter()
                    .filter(|song| song.fail_times > 0)
                    .map(|song| (song.id.clone(), song.fail_times))
                    .collect(),
            ),
            radio_source: radio.source,
            radio: Mutex::new(radio.batches.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn url_calls(&self) -> usize {
        self.url_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn check_calls(&self) -> usize {
        self.check_calls.load(Ordering::SeqCst)
    }

    fn url_info(&self, id: &SongId, quality: QualityLevel) -> Result<UrlInfo> {
        let Some(song) = self.songs.get(id) else {
            return Err(Error::not_found(format!("song {id} not found")));
        };
        if song.missing {
            return Err(Error::not_found(format!("resource of {id} not found")));
        }
        if song.paid {
            return Err(Error::permission_denied(format!("album of {id} not purchased")));
        }

        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(remaining) = failures.get_mut(id).filter(|remaining| **remaining > 0) {
            *remaining -= 1;
            return Err(Error::unavailable(format!("catalog busy serving {id}")));
        }

        Ok(UrlInfo {
            id: id.clone(),
            url: song.url.clone(),
            level: Some(song.level.unwrap_or(quality)),
            size: song.size,
            bitrate: song.bitrate,
            trial: song.trial,
        })
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn batch_check_availability(
        &self,
        ids: &[SongId],
        _quality: QualityLevel,
    ) -> Result<HashMap<SongId, bool>> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ids
            .iter()
            .map(|id| {
                let available = self.songs.get(id).is_some_and(|song| song.available);
                (id.clone(), available)
            })
            .collect())
    }

    async fn get_song_urls(
        &self,
        ids: &[SongId],
        quality: QualityLevel,
        _skip_check: bool,
        cancel: &CancellationToken,
    ) -> Result<HashMap<SongId, UrlInfo>> {
        self.url_calls.fetch_add(1, Ordering::SeqCst);

        let latency = ids
            .iter()
            .filter_map(|id| self.songs.get(id))
            .map(|song| song.latency)
            .max()
            .unwrap_or_default();
        if !latency.is_zero() {
            tokio::select! {
                biased;

                () = cancel.cancelled() => return Err(Error::cancelled("url request cancelled")),
                () = tokio::time::sleep(latency) => {}
            }
        }

        ids.iter()
            .map(|id| Ok((id.clone(), self.url_info(id, quality)?)))
            .collect()
    }

    async fn get_song_details(&self, ids: &[SongId]) -> Result<Vec<Song>> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ids
            .iter()
            .filter_map(|id| self.songs.get(id))
            .map(FixtureSong::to_song)
            .collect())
    }
}

#[async_trait]
impl RadioFeed for MemoryCatalog {
    fn source(&self) -> ViewSource {
        self.radio_source.clone()
    }

    async fn fetch_more(&self, _cancel: &CancellationToken) -> Result<Vec<Song>> {
        let batch = self
            .radio
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_default();

        Ok(batch
            .iter()
            .filter_map(|id| self.songs.get(id))
            .map(|song| {
                let mut song = song.to_song();
                song.view_source = Some(self.radio_source.clone());
                song
            })
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryUnblocker {
    matches: HashMap<SongId, UnblockMatch>,
    pub calls: AtomicUsize,
}

impl MemoryUnblocker {
    #[must_use]
    pub fn new(fixture: &Fixture) -> Self {
        let matches = fixture
            .songs
            .iter()
            .filter_map(|song| {
                let unblock = song.unblock.as_ref()?;
                let found = UnblockMatch {
                    url: unblock.url.clone(),
                    headers: HeaderMap::new(),
                    size: unblock.size,
                    bitrate: unblock.bitrate,
                    duration_ms: unblock.duration_ms,
                    source: unblock.source.clone(),
                };
                Some((song.id.clone(), found))
            })
            .collect();

        Self {
            matches,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Unblocker for MemoryUnblocker {
    async fn try_match(&self, song: &Song, _cancel: &CancellationToken) -> Result<Option<UnblockMatch>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.matches.get(&song.id).cloned())
    }
}

/// Stream sizes disclosed by hosts, keyed by URL.
#[derive(Debug, Default)]
pub struct MemoryContentLength {
    lengths: HashMap<Url, u64>,
    pub calls: AtomicUsize,
}

impl MemoryContentLength {
    #[must_use]
    pub fn new(fixture: &Fixture) -> Self {
        let lengths = fixture
            .songs
            .iter()
            .filter_map(|song| Some((song.url.clone()?, song.content_length?)))
            .collect();

        Self {
            lengths,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ContentLength for MemoryContentLength {
    async fn content_length(&self, url: &Url, _headers: &HeaderMap) -> Result<Option<u64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.lengths.get(url).copied())
    }
}

/// List layer holding one visible list.
#[derive(Debug, Default)]
pub struct MemoryView {
    shown: Mutex<Option<ViewSnapshot>>,
    availability: Mutex<HashMap<SongId, Availability>>,
}

impl MemoryView {
    pub fn show(&self, source: ViewSource, songs: Vec<Song>) {
        *self.shown.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(ViewSnapshot::new(source, songs));
    }

    /// Last availability refreshed for `id`.
    #[must_use]
    pub fn availability(&self, id: &SongId) -> Option<Availability> {
        self.availability
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
    }
}

impl ListView for MemoryView {
    fn snapshot(&self) -> Option<ViewSnapshot> {
        self.shown.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn patch_placeholder(&self, source: &ViewSource, index: usize, song: &Song) -> bool {
        let mut shown = self.shown.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(snapshot) = shown.as_mut().filter(|snapshot| &snapshot.source == source) else {
            return false;
        };

        let songs = Arc::make_mut(&mut snapshot.songs);
        match songs.get_mut(index) {
            Some(entry) if entry.is_placeholder() => {
                *entry = song.clone();
                true
            }
            _ => false,
        }
    }

    fn refresh_availability(&self, id: &SongId, availability: Availability) {
        self.availability
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), availability);
    }
}

/// Audio engine that records what it was asked to play.
#[derive(Debug, Default)]
pub struct MemoryAudio {
    played: Mutex<Vec<(SongId, Url)>>,
    position: Mutex<Duration>,
    startup: Duration,
}

impl MemoryAudio {
    /// Engine that takes `startup` to open each stream.
    #[must_use]
    pub fn with_startup(startup: Duration) -> Self {
        Self {
            startup,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn played(&self) -> Vec<SongId> {
        self.played
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    #[must_use]
    pub fn last_url(&self) -> Option<Url> {
        self.played
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .map(|(_, url)| url.clone())
    }

    pub fn set_position(&self, position: Duration) {
        *self.position.lock().unwrap_or_else(PoisonError::into_inner) = position;
    }
}

#[async_trait]
impl AudioEngine for MemoryAudio {
    async fn play(
        &self,
        song: &Song,
        stream: &QualityUrlInfo,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if !self.startup.is_zero() {
            tokio::select! {
                biased;

                () = cancel.cancelled() => return Err(Error::cancelled("audio start cancelled")),
                () = tokio::time::sleep(self.startup) => {}
            }
        }

        info!("audio: {} from {}", song.friendly_name(), stream.url);
        self.played
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((song.id.clone(), stream.url.clone()));
        self.set_position(Duration::ZERO);
        Ok(true)
    }

    fn position(&self) -> Duration {
        *self.position.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop(&self) {
        self.set_position(Duration::ZERO);
    }
}

#[derive(Debug, Default)]
pub struct MemoryReports {
    pub begun: Mutex<Vec<PlaybackSession>>,
    pub ended: Mutex<Vec<SessionEnd>>,
}

#[async_trait]
impl ReportSink for MemoryReports {
    async fn begin(&self, session: &PlaybackSession) -> Result<()> {
        self.begun
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(session.clone());
        Ok(())
    }

    async fn complete(&self, end: &SessionEnd) -> Result<()> {
        self.ended
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(end.clone());
        Ok(())
    }
}

/// All in-memory collaborators of one fixture.
#[derive(Clone)]
pub struct Memory {
    pub catalog: Arc<MemoryCatalog>,
    pub unblocker: Arc<MemoryUnblocker>,
    pub content_length: Arc<MemoryContentLength>,
    pub view: Arc<MemoryView>,
    pub audio: Arc<MemoryAudio>,
    pub reports: Arc<MemoryReports>,
    has_radio: bool,
}

impl Memory {
    #[must_use]
    pub fn new(fixture: &Fixture) -> Self {
        Self {
            catalog: Arc::new(MemoryCatalog::new(fixture)),
            unblocker: Arc::new(MemoryUnblocker::new(fixture)),
            content_length: Arc::new(MemoryContentLength::new(fixture)),
            view: Arc::new(MemoryView::default()),
            audio: Arc::new(MemoryAudio::default()),
            reports: Arc::new(MemoryReports::default()),
            has_radio: fixture.radio.is_some(),
        }
    }

    #[must_use]
    pub fn with_audio(mut self, audio: MemoryAudio) -> Self {
        self.audio = Arc::new(audio);
        self
    }

    #[must_use]
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            catalog: self.catalog.clone(),
            audio: self.audio.clone(),
            view: self.view.clone(),
            content_length: self.content_length.clone(),
            unblocker: Some(self.unblocker.clone()),
            radio: self
                .has_radio
                .then(|| self.catalog.clone() as Arc<dyn RadioFeed>),
            reports: Some(self.reports.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fixture() {
        let fixture = Fixture::parse(
            r#"
            [[songs]]
            id = "1"
            name = "One"
            duration = 240
            url = "https://cdn.example.com/1.flac"
            trial = { start_ms = 0, end_ms = 30000 }
            latency = 50

            [[songs]]
            id = "2"
            name = "Two"
            missing = true
            unblock = { url = "https://mirror.example.com/2.mp3" }

            [[views]]
            source = "playlist:1"
            songs = ["1", "2"]
            lazy = true
            "#,
        )
        .unwrap();

        let one = &fixture.songs[0];
        assert!(one.available);
        assert_eq!(one.duration, Duration::from_secs(240));
        assert_eq!(one.latency, Duration::from_millis(50));
        assert_eq!(one.trial, Some(TrialWindow::new(0, 30_000)));
        assert!(fixture.songs[1].unblock.is_some());

        let view = fixture.view(&ViewSource::from("playlist:1")).unwrap();
        let songs = fixture.view_songs(view);
        assert!(songs.iter().all(Song::is_placeholder));
        assert_eq!(songs[1].slot, Some(1));
    }

    #[test]
    fn rejects_unknown_view_song() {
        let result = Fixture::parse(
            r#"
            [[views]]
            source = "playlist:1"
            songs = ["9"]
            "#,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn scripted_failures_run_out() {
        let fixture = Fixture::parse(
            r#"
            [[songs]]
            id = "1"
            url = "https://cdn.example.com/1.flac"
            fail_times = 1
            "#,
        )
        .unwrap();
        let catalog = MemoryCatalog::new(&fixture);
        let ids = [SongId::from("1")];
        let cancel = CancellationToken::new();

        let first = catalog
            .get_song_urls(&ids, QualityLevel::High, true, &cancel)
            .await;
        assert!(first.is_err());
        let second = catalog
            .get_song_urls(&ids, QualityLevel::High, true, &cancel)
            .await
            .unwrap();
        assert_eq!(second[&ids[0]].level, Some(QualityLevel::High));
        assert_eq!(catalog.url_calls(), 2);
    }
}
