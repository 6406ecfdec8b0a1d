//! Playback control: requests, queue walking and audio start.
//!
//! Every request (`play_song`, `play_next`, `play_previous`, `start_radio`)
//! begins a new [`Scope`], which cancels the request before it. The request
//! then:
//!
//! 1. Loads a placeholder candidate, or parks the request until the list
//!    layer has loaded it
//! 2. Resolves the song to a stream
//! 3. Starts audio, announces the song and opens a report session, each only
//!    after checking that the request is still current
//!
//! # Walking the queue
//!
//! Next and previous walk the queue until a candidate starts. Candidates
//! the catalog reports as gone are removed and skipped. A set of visited
//! candidates and an attempt limit stop the walk when nothing is playable.
//! Manual walks probe each candidate within a time budget and raise alerts;
//! automatic advance only reports status text.
//!
//! # Background work
//!
//! After a start, the predicted next song is resolved in the background
//! under a child of the request scope. Enrichment of the visible list runs
//! through the [`Enricher`].

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::mpsc::UnboundedSender, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    cache::SongCache,
    catalog::{Catalog, RadioFeed},
    config::Config,
    enrich::Enricher,
    error::Result,
    events::{Alert, Event},
    http::ContentLength,
    placeholder::PlaceholderResolver,
    quality::{QualityLevel, QualityUrlInfo},
    queue::{MoveResult, PlayMode, PlaybackQueue, QueueSnapshot, Route},
    report::{EndReason, ReportSink, Reporter},
    resolve::{ResolveResult, Resolver},
    scope::{RequestScope, Scope},
    song::{Availability, Song, SongId, ViewSource},
    unblock::{UnblockFallback, Unblocker},
    view::ListView,
};

/// Audio output engine.
#[async_trait]
pub trait AudioEngine: Send + Sync {
    /// Starts playing `stream` of `song`, replacing whatever plays now.
    /// Returns `false` when the engine could not open the stream.
    async fn play(
        &self,
        song: &Song,
        stream: &QualityUrlInfo,
        cancel: &CancellationToken,
    ) -> Result<bool>;

    /// Position within the current song.
    fn position(&self) -> Duration;

    fn stop(&self);
}

/// Services the player consumes.
pub struct Collaborators {
    pub catalog: Arc<dyn Catalog>,
    pub audio: Arc<dyn AudioEngine>,
    pub view: Arc<dyn ListView>,
    pub content_length: Arc<dyn ContentLength>,
    pub unblocker: Option<Arc<dyn Unblocker>>,
    pub radio: Option<Arc<dyn RadioFeed>>,
    pub reports: Option<Arc<dyn ReportSink>>,
}

/// How a playback request ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlayOutcome {
    /// Audio started for this song.
    Started { id: SongId, used_unblock: bool },

    /// A newer request took over. Nothing visible happened.
    Superseded,

    /// The candidate is still loading; playback starts once it is patched in.
    Parked,

    QueueEmpty,

    /// The walk ran off the end of a sequential queue.
    Boundary,

    /// Every candidate within the attempt limit was unplayable or visited.
    NoPlayableSong,

    Unplayable(ResolveResult),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Direction {
    Next,
    Previous,
}

#[derive(Copy, Clone, Debug)]
struct Request {
    is_manual: bool,
    /// Why the song playing so far ends if this request starts another.
    end_reason: EndReason,
    probe_timeout: Option<Duration>,
    /// Level the request resolves and plays at.
    quality: QualityLevel,
}

#[derive(Copy, Clone, Debug)]
struct Settings {
    mode: PlayMode,
    quality: QualityLevel,
}

struct Inner {
    config: Config,
    settings: Mutex<Settings>,

    scopes: RequestScope,
    resolver: Resolver,
    placeholders: PlaceholderResolver,
    queue: Mutex<PlaybackQueue>,
    cache: SongCache,
    enricher: Enricher,
    reporter: Reporter,

    audio: Arc<dyn AudioEngine>,
    view: Arc<dyn ListView>,
    radio: Option<Arc<dyn RadioFeed>>,

    events: UnboundedSender<Event>,
    now_playing: Mutex<Option<Song>>,
    preload: Mutex<Option<CancellationToken>>,
}

#[derive(Clone)]
pub struct Player {
    inner: Arc<Inner>,
}

impl Player {
    #[must_use]
    pub fn new(config: Config, collaborators: Collaborators, events: UnboundedSender<Event>) -> Self {
        let Collaborators {
            catalog,
            audio,
            view,
            content_length,
            unblocker,
            radio,
            reports,
        } = collaborators;

        let unblock = UnblockFallback::new(
            &config,
            unblocker,
            Arc::clone(&catalog),
            Arc::clone(&content_length),
        );
        let resolver = Resolver::new(
            &config,
            Arc::clone(&catalog),
            unblock,
            content_length,
            Arc::clone(&view),
        );

        let inner = Inner {
            settings: Mutex::new(Settings {
                mode: config.mode,
                quality: config.quality,
            }),
            scopes: RequestScope::new(config.min_request_interval),
            resolver,
            placeholders: PlaceholderResolver::new(&config, catalog, Arc::clone(&view)),
            queue: Mutex::new(PlaybackQueue::new()),
            cache: SongCache::new(config.cache_capacity),
            enricher: Enricher::new(config.enrichment_concurrency),
            reporter: Reporter::new(reports),
            audio,
            view,
            radio,
            events,
            now_playing: Mutex::new(None),
            preload: Mutex::new(None),
            config,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Plays a song the user picked.
    pub async fn play_song(&self, song: Song) -> PlayOutcome {
        let Some(scope) = self.begin().await else {
            return PlayOutcome::Superseded;
        };
        self.inner.placeholders.cancel_pending();

        let selected = {
            let snapshot = self.inner.view.snapshot();
            self.queue().select(&song, snapshot.as_ref())
        };
        let candidate = selected.song.unwrap_or(song);

        let request = Request {
            is_manual: true,
            end_reason: EndReason::Interrupted,
            probe_timeout: None,
            quality: self.quality(),
        };
        self.start(&scope, candidate, request).await
    }

    /// Moves to the next playable song.
    pub async fn play_next(&self, is_manual: bool) -> PlayOutcome {
        let Some(scope) = self.begin().await else {
            return PlayOutcome::Superseded;
        };
        self.walk(&scope, Direction::Next, self.request(is_manual)).await
    }

    /// Moves to the previous playable song.
    pub async fn play_previous(&self, is_manual: bool) -> PlayOutcome {
        let Some(scope) = self.begin().await else {
            return PlayOutcome::Superseded;
        };
        self.walk(&scope, Direction::Previous, self.request(is_manual)).await
    }

    /// Advances after the audio engine finished a song.
    pub async fn on_playback_ended(&self) -> PlayOutcome {
        self.play_next(false).await
    }

    /// Replaces the queue with the personal radio and starts playing it.
    pub async fn start_radio(&self) -> PlayOutcome {
        let Some(radio) = self.inner.radio.clone() else {
            warn!("no personal radio configured");
            return PlayOutcome::QueueEmpty;
        };
        let Some(scope) = self.begin().await else {
            return PlayOutcome::Superseded;
        };

        let cancel = scope.child();
        let songs = tokio::select! {
            biased;

            () = scope.token.cancelled() => return PlayOutcome::Superseded,
            songs = radio.fetch_more(&cancel) => songs,
        };
        let songs = match songs {
            Ok(songs) => songs,
            Err(e) => {
                error!("starting personal radio failed: {e}");
                self.status(scope.version, "Personal radio is unavailable");
                return PlayOutcome::QueueEmpty;
            }
        };

        self.queue().set_queue(Some(radio.source()), songs, None);
        self.walk(&scope, Direction::Next, self.request(true)).await
    }

    /// Resolves a song without playing it, for downloads and sharing. The
    /// current request is not affected.
    pub async fn resolve(
        &self,
        song: &Song,
        quality: QualityLevel,
        cancel: &CancellationToken,
    ) -> (Song, ResolveResult) {
        let mut song = song.clone();
        if song.is_placeholder() {
            let loaded = match (song.view_source.clone(), song.slot) {
                (Some(source), Some(slot)) => {
                    self.inner.placeholders.resolve(&source, slot, cancel).await
                }
                _ => None,
            };
            match loaded {
                Some(loaded) => song = loaded,
                None if cancel.is_cancelled() => return (song, ResolveResult::Canceled),
                None => return (song, ResolveResult::Failed),
            }
        }

        if let Some(cached) = self.inner.cache.get(&song.id) {
            song.adopt_if_newer(&cached);
        }
        let result = self.inner.resolver.resolve(&mut song, quality, cancel).await;
        if result != ResolveResult::Canceled {
            self.commit(&song);
        }
        (song, result)
    }

    /// Stream link of a song at the current quality.
    pub async fn share_url(&self, song: &Song, cancel: &CancellationToken) -> Option<Url> {
        let quality = self.quality();
        let (song, result) = self.resolve(song, quality, cancel).await;
        if !result.is_success() {
            debug!("cannot share {song}: {result}");
            return None;
        }
        song.stream(quality).map(|stream| stream.url.clone())
    }

    /// Queues a song to play after the current one.
    pub fn insert_next(&self, song: Song) -> Route {
        self.queue().insert_next(song)
    }

    pub fn set_mode(&self, mode: PlayMode) {
        self.settings().mode = mode;
        if mode == PlayMode::Random {
            self.queue().prepare_shuffle();
        }
        info!("play mode: {mode}");
    }

    pub fn set_quality(&self, quality: QualityLevel) {
        self.settings().quality = quality;
        info!("quality: {quality}");
    }

    #[must_use]
    pub fn mode(&self) -> PlayMode {
        self.settings().mode
    }

    #[must_use]
    pub fn quality(&self) -> QualityLevel {
        self.settings().quality
    }

    /// Replaces the queue without starting playback.
    pub fn set_queue(&self, source: Option<ViewSource>, songs: Vec<Song>, index: Option<usize>) {
        let mut queue = self.queue();
        queue.set_queue(source, songs, index);
        if self.mode() == PlayMode::Random {
            queue.prepare_shuffle();
        }
    }

    #[must_use]
    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.queue().snapshot()
    }

    #[must_use]
    pub fn now_playing(&self) -> Option<Song> {
        self.inner
            .now_playing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Latest known copy of a song.
    #[must_use]
    pub fn cached(&self, id: &SongId) -> Option<Song> {
        self.inner.cache.get(id)
    }

    /// Stops playback and cancels the current request.
    pub async fn stop(&self) {
        self.inner.scopes.cancel_active();
        self.cancel_preload();
        self.inner.placeholders.cancel_pending();

        let played = self.inner.audio.position();
        self.inner.audio.stop();
        self.inner.reporter.finish(played, EndReason::Interrupted).await;
        self.inner
            .now_playing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// The list layer shows another list. Cancels enrichment of the previous
    /// list and starts loading and pre-checking this one.
    pub fn view_changed(
        &self,
        source: ViewSource,
        ids: Option<Vec<SongId>>,
    ) -> Vec<JoinHandle<Option<()>>> {
        let token = self.inner.enricher.begin_view(source.clone());
        if let Some(ids) = ids {
            self.inner.placeholders.remember_ids(source.clone(), ids);
        }

        let hydrate = {
            let player = self.clone();
            let source = source.clone();
            let token = token.clone();
            self.inner.enricher.spawn(token.clone(), async move {
                let loading = player
                    .inner
                    .placeholders
                    .hydrate(&source, &token, |page| player.page_loaded(&source, page));
                match loading.await {
                    Ok(0) => {}
                    Ok(loaded) => debug!("loaded {loaded} entries of {source}"),
                    Err(e) if e.is_cancelled() => return,
                    Err(e) => warn!("loading {source} failed: {e}"),
                }
                player.dispatch_parked(&source).await;
            })
        };

        let precheck = {
            let player = self.clone();
            let token = token.clone();
            self.inner.enricher.spawn(token.clone(), async move {
                player.precheck(&source, &token).await;
            })
        };

        vec![hydrate, precheck]
    }

    /// The list layer replaced the placeholder at `index` of `source`. If a
    /// request was parked on that entry, it is played now.
    pub async fn notify_view_patched(
        &self,
        source: &ViewSource,
        index: usize,
        song: &Song,
    ) -> Option<PlayOutcome> {
        self.queue().patch(source, index, song);
        if !self.inner.placeholders.take_pending(source, index) {
            return None;
        }

        debug!("dispatching parked playback of {song}");
        Some(self.play_song(song.clone()).await)
    }

    async fn begin(&self) -> Option<Scope> {
        let scope = self.inner.scopes.begin();
        self.cancel_preload();
        match self.inner.scopes.throttle(&scope).await {
            Ok(()) => Some(scope),
            Err(_) => None,
        }
    }

    fn request(&self, is_manual: bool) -> Request {
        if is_manual {
            Request {
                is_manual,
                end_reason: EndReason::Skipped,
                probe_timeout: Some(self.inner.config.manual_probe_timeout),
                quality: self.quality(),
            }
        } else {
            Request {
                is_manual,
                end_reason: EndReason::Completed,
                probe_timeout: None,
                quality: self.quality(),
            }
        }
    }

    /// Plays one candidate without skipping.
    async fn start(&self, scope: &Scope, candidate: Song, request: Request) -> PlayOutcome {
        let mut song = match self.load_placeholder(scope, candidate).await {
            Ok(song) => song,
            Err(outcome) => return outcome,
        };

        let result = self.resolve_scoped(scope, &mut song, request).await;
        self.settle(scope, song, result, request).await
    }

    async fn walk(&self, scope: &Scope, direction: Direction, request: Request) -> PlayOutcome {
        let mode = self.mode();

        if let Some(current) = self.now_playing() {
            self.queue().advance_for_playback(&current);
        }
        if direction == Direction::Next && mode != PlayMode::LoopOne {
            self.refill_radio(scope).await;
        }

        let mut limit = self.queue().manual_attempt_limit();
        let mut visited = HashSet::new();
        let mut refilled = false;
        let mut attempts = 0;

        while attempts < limit {
            attempts += 1;
            if scope.is_cancelled() {
                return PlayOutcome::Superseded;
            }

            let (saved, step) = {
                let mut queue = self.queue();
                let saved = queue.cursor();
                let step = navigate(&mut queue, direction, mode, request.is_manual);
                (saved, step)
            };

            if step.queue_empty {
                self.status(scope.version, "Playback queue is empty");
                return PlayOutcome::QueueEmpty;
            }

            let Some(song) = step.song.clone() else {
                self.queue().restore(saved);

                if direction == Direction::Next && !refilled && self.is_radio_queue() {
                    refilled = true;
                    if self.refill_radio(scope).await > 0 {
                        limit = limit.max(attempts + self.queue().manual_attempt_limit());
                        continue;
                    }
                }
                if scope.is_cancelled() {
                    return PlayOutcome::Superseded;
                }

                if request.is_manual {
                    let text = match direction {
                        Direction::Next => "Already at the last song",
                        Direction::Previous => "Already at the first song",
                    };
                    self.status(scope.version, text);
                } else {
                    self.status(scope.version, "Reached the end of the queue");
                    self.emit(Event::QueueFinished {
                        version: scope.version,
                    });
                }
                return PlayOutcome::Boundary;
            };

            let key = step.attempt_key().unwrap_or_default();
            if !visited.insert(key) {
                debug!("revisiting {song}, giving up");
                break;
            }

            if song.is_placeholder() {
                return self.start(scope, song, request).await;
            }

            let mut song = song;
            match self.resolve_scoped(scope, &mut song, request).await {
                ResolveResult::NotAvailable => {
                    self.status(
                        scope.version,
                        format!("Skipped: {} (official resource missing)", song.friendly_name()),
                    );
                    self.forget(&song.id);
                    self.queue().restore(saved);
                }
                result => return self.settle(scope, song, result, request).await,
            }
        }

        if scope.is_cancelled() {
            return PlayOutcome::Superseded;
        }
        self.status(scope.version, "No playable song found");
        PlayOutcome::NoPlayableSong
    }

    async fn load_placeholder(&self, scope: &Scope, song: Song) -> std::result::Result<Song, PlayOutcome> {
        if !song.is_placeholder() {
            return Ok(song);
        }

        let (Some(source), Some(slot)) = (song.view_source.clone(), song.slot) else {
            warn!("{song} has no list position");
            return Err(PlayOutcome::Unplayable(ResolveResult::Failed));
        };

        match self.inner.placeholders.resolve(&source, slot, &scope.child()).await {
            Some(loaded) => {
                self.queue().patch(&source, slot, &loaded);
                Ok(loaded)
            }
            None if scope.is_cancelled() => Err(PlayOutcome::Superseded),
            None => {
                self.inner.placeholders.park(source, slot);
                self.status(scope.version, "Song is still loading, it plays once loaded");
                Err(PlayOutcome::Parked)
            }
        }
    }

    /// Resolves under the request scope and commits the result.
    async fn resolve_scoped(&self, scope: &Scope, song: &mut Song, request: Request) -> ResolveResult {
        if let Some(cached) = self.inner.cache.get(&song.id) {
            song.adopt_if_newer(&cached);
        }

        self.emit(Event::Loading {
            version: scope.version,
            song_id: song.id.clone(),
            name: song.friendly_name(),
        });

        let token = scope.child();
        let resolving = self.inner.resolver.resolve(song, request.quality, &token);
        let result = match request.probe_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, resolving).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("resolving timed out after {}s", timeout.as_secs());
                    ResolveResult::Failed
                }
            },
            None => resolving.await,
        };

        if scope.is_cancelled() {
            return ResolveResult::Canceled;
        }
        if result != ResolveResult::Canceled {
            self.commit(song);
        }
        result
    }

    async fn settle(&self, scope: &Scope, song: Song, result: ResolveResult, request: Request) -> PlayOutcome {
        let name = song.friendly_name();
        match result {
            ResolveResult::Success { used_unblock } => {
                return self.start_audio(scope, song, used_unblock, request).await;
            }
            ResolveResult::Canceled => return PlayOutcome::Superseded,
            ResolveResult::NotAvailable => {
                self.status(scope.version, format!("{name} is not available"));
                if request.is_manual {
                    self.alert(scope.version, Alert::NotAvailable { name });
                }
            }
            ResolveResult::PaidAlbumNotPurchased => {
                self.status(scope.version, format!("{name} requires purchasing the album"));
                if request.is_manual {
                    let url = self.inner.config.purchase_link(song.id.as_str());
                    self.alert(scope.version, Alert::PurchaseRequired { name, url });
                }
            }
            ResolveResult::Failed => {
                self.status(scope.version, format!("Failed to get playback URL: {name}"));
                if request.is_manual {
                    self.alert(scope.version, Alert::Failed { name });
                }
            }
        }

        PlayOutcome::Unplayable(result)
    }

    async fn start_audio(
        &self,
        scope: &Scope,
        song: Song,
        used_unblock: bool,
        request: Request,
    ) -> PlayOutcome {
        let quality = request.quality;
        let Some(stream) = song.stream(quality).cloned() else {
            error!("{song} resolved without a {quality} stream");
            return PlayOutcome::Unplayable(ResolveResult::Failed);
        };

        if !self.inner.scopes.is_current_and_bound_to(scope.version, &scope.token) {
            return PlayOutcome::Superseded;
        }

        let played = self.inner.audio.position();
        match self.inner.audio.play(&song, &stream, &scope.token).await {
            Ok(true) => {}
            Ok(false) => {
                return self.audio_failed(scope, &song, request, "audio engine refused the stream");
            }
            Err(e) if e.is_cancelled() => return PlayOutcome::Superseded,
            Err(e) => return self.audio_failed(scope, &song, request, &e.to_string()),
        }

        if !self.inner.scopes.is_current_and_bound_to(scope.version, &scope.token) {
            debug!("{song} started after request {} was superseded", scope.version);
            return PlayOutcome::Superseded;
        }

        self.queue().advance_for_playback(&song);
        *self
            .inner
            .now_playing
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(song.clone());

        self.emit(Event::NowPlaying {
            version: scope.version,
            id: song.id.clone(),
            name: song.name.clone(),
            artist: song.artist(),
            used_unblock,
            trial: stream.is_trial(),
        });
        info!("playing {song} at {}", stream.level);

        if let Some(previous) = self.inner.reporter.begin(&song, quality, scope.version).await {
            self.inner
                .reporter
                .complete(previous, played, request.end_reason)
                .await;
        }

        self.preload_next(scope);

        PlayOutcome::Started {
            id: song.id,
            used_unblock,
        }
    }

    fn audio_failed(&self, scope: &Scope, song: &Song, request: Request, reason: &str) -> PlayOutcome {
        error!("playing {song} failed: {reason}");
        let name = song.friendly_name();
        self.status(scope.version, format!("Failed to play {name}"));
        if request.is_manual {
            self.alert(scope.version, Alert::Failed { name });
        }
        PlayOutcome::Unplayable(ResolveResult::Failed)
    }

    /// Resolves the predicted next song under a child of `scope`.
    fn preload_next(&self, scope: &Scope) {
        if !self.inner.config.preload {
            return;
        }

        let token = scope.child();
        if let Some(previous) = self
            .inner
            .preload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone())
        {
            previous.cancel();
        }

        let player = self.clone();
        tokio::spawn(async move {
            player.preload(&token).await;
        });
    }

    async fn preload(&self, token: &CancellationToken) {
        let Settings { mode, quality } = *self.settings();
        let predicted = self
            .queue()
            .predict_next_available(mode, self.inner.config.predict_attempts);
        let Some(mut song) = predicted else {
            return;
        };

        if let Some(cached) = self.inner.cache.get(&song.id) {
            song.adopt_if_newer(&cached);
        }
        if song.stream(quality).is_some_and(|stream| !stream.is_trial()) {
            return;
        }

        trace!("preloading {song}");
        let result = self.inner.resolver.resolve(&mut song, quality, token).await;
        if result != ResolveResult::Canceled {
            self.commit(&song);
        }
    }

    fn cancel_preload(&self) {
        if let Some(token) = self
            .inner
            .preload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }

    /// Fetches more radio songs when the radio queue is about to run out.
    /// Returns the number of songs added.
    async fn refill_radio(&self, scope: &Scope) -> usize {
        let Some(radio) = self.inner.radio.clone() else {
            return 0;
        };
        let source = radio.source();
        let low = {
            let queue = self.queue();
            queue.source() == Some(&source)
                && queue.remaining() <= self.inner.config.radio_refill_threshold
        };
        if !low {
            return 0;
        }

        let cancel = scope.child();
        let songs = tokio::select! {
            biased;

            () = scope.token.cancelled() => return 0,
            songs = radio.fetch_more(&cancel) => songs,
        };
        match songs {
            Ok(songs) => {
                let added = self.queue().append(songs);
                debug!("added {added} radio songs");
                added
            }
            Err(e) => {
                warn!("refilling personal radio failed: {e}");
                0
            }
        }
    }

    fn is_radio_queue(&self) -> bool {
        self.inner
            .radio
            .as_ref()
            .is_some_and(|radio| self.queue().source() == Some(&radio.source()))
    }

    async fn precheck(&self, source: &ViewSource, cancel: &CancellationToken) {
        let Some(snapshot) = self
            .inner
            .view
            .snapshot()
            .filter(|snapshot| &snapshot.source == source)
        else {
            return;
        };

        let mut songs = snapshot.songs.to_vec();
        let quality = self.quality();
        match self.inner.resolver.probe().apply(&mut songs, quality, cancel).await {
            Ok(unavailable) => {
                for id in unavailable {
                    self.inner
                        .view
                        .refresh_availability(&id, Availability::Unavailable);
                }
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => debug!("pre-checking {source} failed: {e}"),
        }
    }

    /// Patches a freshly loaded page into the queue. A request parked on one
    /// of its entries is dispatched right away.
    fn page_loaded(&self, source: &ViewSource, page: &[(usize, Song)]) {
        for (slot, song) in page {
            self.queue().patch(source, *slot, song);
            if self.inner.placeholders.take_pending(source, *slot) {
                debug!("dispatching parked playback of {song}");
                let player = self.clone();
                let song = song.clone();
                tokio::spawn(async move {
                    player.play_song(song).await;
                });
            }
        }
    }

    async fn dispatch_parked(&self, source: &ViewSource) {
        let Some((parked, slot)) = self.inner.placeholders.pending() else {
            return;
        };
        if &parked != source {
            return;
        }

        let loaded = self
            .inner
            .view
            .snapshot()
            .filter(|snapshot| &snapshot.source == source)
            .and_then(|snapshot| snapshot.get(slot).cloned())
            .filter(|song| !song.is_placeholder());
        if let Some(song) = loaded {
            self.notify_view_patched(source, slot, &song).await;
        }
    }

    fn commit(&self, song: &Song) {
        if self.inner.cache.put(song.clone()) {
            self.queue().update_song(song);
        }
    }

    fn forget(&self, id: &SongId) {
        self.queue().remove_song_by_id(id);
        self.inner.cache.remove(id);
    }

    fn emit(&self, event: Event) {
        if !self.inner.scopes.is_current(event.version()) {
            trace!("dropping event of superseded request {}", event.version());
            return;
        }
        if self.inner.events.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }

    fn status(&self, version: u64, text: impl Into<String>) {
        let text = text.into();
        debug!("{text}");
        self.emit(Event::Status { version, text });
    }

    fn alert(&self, version: u64, alert: Alert) {
        self.emit(Event::Alert { version, alert });
    }

    fn queue(&self) -> MutexGuard<'_, PlaybackQueue> {
        self.inner.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settings(&self) -> MutexGuard<'_, Settings> {
        self.inner.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One navigation step. Random mode gets its shuffle order on first use.
fn navigate(queue: &mut PlaybackQueue, direction: Direction, mode: PlayMode, is_manual: bool) -> MoveResult {
    if mode == PlayMode::Random && !queue.is_shuffle_ready() {
        queue.prepare_shuffle();
    }

    let result = match direction {
        Direction::Next => queue.move_next(mode, is_manual),
        Direction::Previous => queue.move_previous(mode, is_manual),
    };
    result.unwrap_or_else(|e| {
        warn!("cannot move {direction:?}: {e}");
        MoveResult::default()
    })
}
