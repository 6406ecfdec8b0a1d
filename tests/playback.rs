mod common;

use std::{collections::HashSet, time::Duration};

use tracklane::{
    config::Config,
    events::{Alert, Event},
    player::PlayOutcome,
    quality::QualityLevel,
    queue::{PlayMode, Route},
    report::EndReason,
    resolve::ResolveResult,
    song::{Availability, SongId, ViewSource},
};

use common::{alerts, now_playing, statuses, Harness, THREE_SONGS};

fn started(id: &str) -> PlayOutcome {
    PlayOutcome::Started {
        id: SongId::from(id),
        used_unblock: false,
    }
}

#[tokio::test(start_paused = true)]
async fn only_the_latest_request_takes_effect() {
    let mut h = Harness::new(
        r#"
        [[songs]]
        id = "x"
        name = "X"
        url = "https://cdn.example.com/x.flac"
        size = 1000
        latency = 100

        [[songs]]
        id = "y"
        name = "Y"
        url = "https://cdn.example.com/y.flac"
        size = 1000
        latency = 100
        "#,
    );

    let first = {
        let player = h.player.clone();
        let song = h.song("x");
        tokio::spawn(async move { player.play_song(song).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = h.player.play_song(h.song("y")).await;

    assert_eq!(first.await.unwrap(), PlayOutcome::Superseded);
    assert_eq!(second, started("y"));
    assert_eq!(h.played(), ["y"]);

    let events = h.events();
    assert_eq!(now_playing(&events), ["y"]);
    assert!(alerts(&events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn newer_request_cancels_pending_retry() {
    let h = Harness::new(
        r#"
        [[songs]]
        id = "x"
        name = "X"
        url = "https://cdn.example.com/x.flac"
        size = 1000
        fail_times = 2

        [[songs]]
        id = "y"
        name = "Y"
        url = "https://cdn.example.com/y.flac"
        size = 1000
        "#,
    );

    let first = {
        let player = h.player.clone();
        let song = h.song("x");
        tokio::spawn(async move { player.play_song(song).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.player.play_song(h.song("y")).await, started("y"));
    assert_eq!(first.await.unwrap(), PlayOutcome::Superseded);

    // No retry of "x" follows, however long we wait.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.memory.catalog.url_calls(), 2);
    assert_eq!(h.played(), ["y"]);
}

#[tokio::test(start_paused = true)]
async fn sequential_next_stops_at_last_song() {
    let mut h = Harness::new(THREE_SONGS);
    let songs = h.show("playlist:1");

    assert_eq!(h.player.play_song(songs[0].clone()).await, started("1"));
    assert_eq!(h.player.play_next(true).await, started("2"));
    assert_eq!(h.player.play_next(true).await, started("3"));
    assert_eq!(h.player.play_next(true).await, PlayOutcome::Boundary);

    assert_eq!(h.played(), ["1", "2", "3"]);
    let events = h.events();
    assert!(statuses(&events).contains(&"Already at the last song"));
    assert!(!events
        .iter()
        .any(|event| matches!(event, Event::QueueFinished { .. })));
}

#[tokio::test(start_paused = true)]
async fn auto_advance_finishes_queue() {
    let mut h = Harness::new(THREE_SONGS);
    let songs = h.show("playlist:1");

    h.player.play_song(songs[2].clone()).await;
    assert_eq!(h.player.on_playback_ended().await, PlayOutcome::Boundary);

    let events = h.events();
    assert!(events
        .iter()
        .any(|event| matches!(event, Event::QueueFinished { .. })));
    assert!(alerts(&events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn previous_stops_at_first_song() {
    let mut h = Harness::new(THREE_SONGS);
    let songs = h.show("playlist:1");

    h.player.play_song(songs[0].clone()).await;
    assert_eq!(h.player.play_previous(true).await, PlayOutcome::Boundary);
    assert!(statuses(&h.events()).contains(&"Already at the first song"));
}

#[tokio::test(start_paused = true)]
async fn loop_wraps_around() {
    let h = Harness::new(THREE_SONGS);
    let songs = h.show("playlist:1");
    h.player.set_mode(PlayMode::Loop);

    h.player.play_song(songs[2].clone()).await;
    assert_eq!(h.player.on_playback_ended().await, started("1"));
    assert_eq!(h.player.play_previous(true).await, started("3"));
}

#[tokio::test(start_paused = true)]
async fn loop_one_repeats_until_skipped() {
    let h = Harness::new(THREE_SONGS);
    let songs = h.show("playlist:1");
    h.player.set_mode(PlayMode::LoopOne);

    h.player.play_song(songs[0].clone()).await;
    assert_eq!(h.player.on_playback_ended().await, started("1"));
    assert_eq!(h.player.play_next(true).await, started("2"));
    assert_eq!(h.played(), ["1", "1", "2"]);
    // The repeat came from the committed copy.
    assert_eq!(h.memory.catalog.url_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn random_plays_every_song_once_per_round() {
    let h = Harness::new(
        r#"
        [[songs]]
        id = "1"
        url = "https://cdn.example.com/1.flac"
        size = 1

        [[songs]]
        id = "2"
        url = "https://cdn.example.com/2.flac"
        size = 1

        [[songs]]
        id = "3"
        url = "https://cdn.example.com/3.flac"
        size = 1

        [[songs]]
        id = "4"
        url = "https://cdn.example.com/4.flac"
        size = 1

        [[views]]
        source = "album:1"
        songs = ["1", "2", "3", "4"]
        "#,
    );
    let songs = h.show("album:1");
    h.player.set_mode(PlayMode::Random);

    h.player.play_song(songs[0].clone()).await;
    for _ in 0..3 {
        assert!(matches!(
            h.player.play_next(true).await,
            PlayOutcome::Started { .. }
        ));
    }

    let played: HashSet<String> = h.played().into_iter().collect();
    assert_eq!(played.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn auto_advance_skips_missing_song_silently() {
    let mut h = Harness::new(
        r#"
        [[songs]]
        id = "a"
        name = "A"
        url = "https://cdn.example.com/a.flac"
        size = 1000

        [[songs]]
        id = "b"
        name = "B"
        missing = true

        [[songs]]
        id = "c"
        name = "C"
        url = "https://cdn.example.com/c.flac"
        size = 1000

        [[views]]
        source = "playlist:1"
        songs = ["a", "b", "c"]
        "#,
    );
    let songs = h.show("playlist:1");

    h.player.play_song(songs[0].clone()).await;
    assert_eq!(h.player.on_playback_ended().await, started("c"));

    let events = h.events();
    assert!(alerts(&events).is_empty());
    assert!(statuses(&events).contains(&"Skipped: B (official resource missing)"));
    assert_eq!(
        h.player.queue_snapshot().songs,
        [SongId::from("a"), SongId::from("c")]
    );
    assert!(h.player.cached(&SongId::from("b")).is_none());
}

#[tokio::test(start_paused = true)]
async fn manual_skip_is_bounded() {
    let mut h = Harness::new(
        r#"
        [[songs]]
        id = "1"
        name = "One"
        missing = true

        [[songs]]
        id = "2"
        name = "Two"
        missing = true

        [[songs]]
        id = "3"
        name = "Three"
        missing = true

        [[views]]
        source = "playlist:1"
        songs = ["1", "2", "3"]
        "#,
    );
    let songs = h.show("playlist:1");
    h.player.set_mode(PlayMode::Loop);
    h.player
        .set_queue(Some(ViewSource::from("playlist:1")), songs, None);

    let outcome = h.player.play_next(true).await;

    assert_eq!(outcome, PlayOutcome::QueueEmpty);
    assert_eq!(h.memory.catalog.url_calls(), 3);
    assert!(h.played().is_empty());
    let events = h.events();
    assert!(statuses(&events).contains(&"Playback queue is empty"));
}

#[tokio::test(start_paused = true)]
async fn skip_gives_up_on_revisited_song() {
    let mut h = Harness::with_config(
        r#"
        [[songs]]
        id = "1"
        name = "One"
        url = "https://cdn.example.com/1.flac"
        size = 1000

        [[songs]]
        id = "m"
        name = "Missing"
        missing = true

        [radio]
        source = "radio"
        batches = [["1", "m"], ["m"]]
        "#,
        Config {
            preload: false,
            radio_refill_threshold: 0,
            ..Config::default()
        },
    );
    assert_eq!(h.player.start_radio().await, started("1"));

    // The refill brings back the song that was just dropped.
    let outcome = h.player.play_next(true).await;

    assert_eq!(outcome, PlayOutcome::NoPlayableSong);
    assert_eq!(h.played(), ["1"]);
    assert_eq!(h.memory.catalog.url_calls(), 2);
    let events = h.events();
    let statuses = statuses(&events);
    assert!(statuses.contains(&"Skipped: Missing (official resource missing)"));
    assert_eq!(statuses.last(), Some(&"No playable song found"));
}

#[tokio::test(start_paused = true)]
async fn quality_change_does_not_break_pending_start() {
    let h = Harness::new(
        r#"
        [[songs]]
        id = "slow"
        url = "https://cdn.example.com/slow.flac"
        size = 1000
        latency = 1000
        "#,
    );
    assert_ne!(h.player.quality(), QualityLevel::Standard);
    let song = h.song("slow");

    let player = h.player.clone();
    let playing = tokio::spawn(async move { player.play_song(song).await });
    tokio::time::sleep(Duration::from_millis(500)).await;
    h.player.set_quality(QualityLevel::Standard);

    assert_eq!(playing.await.unwrap(), started("slow"));
    assert_eq!(
        h.memory.audio.last_url().unwrap().as_str(),
        "https://cdn.example.com/slow.flac"
    );
}

#[tokio::test(start_paused = true)]
async fn manual_next_to_paid_song_alerts_with_link() {
    let mut h = Harness::with_config(
        r#"
        [[songs]]
        id = "1"
        name = "One"
        url = "https://cdn.example.com/1.flac"
        size = 1000

        [[songs]]
        id = "2"
        name = "Paid"
        paid = true

        [[views]]
        source = "album:2"
        songs = ["1", "2"]
        "#,
        Config {
            preload: false,
            purchase_url: Some("https://music.example.com/buy?song={id}".to_owned()),
            ..Config::default()
        },
    );
    let songs = h.show("album:2");

    h.player.play_song(songs[0].clone()).await;
    assert_eq!(
        h.player.play_next(true).await,
        PlayOutcome::Unplayable(ResolveResult::PaidAlbumNotPurchased)
    );

    let events = h.events();
    let alerts = alerts(&events);
    assert_eq!(alerts.len(), 1);
    match alerts[0] {
        Alert::PurchaseRequired { name, url } => {
            assert_eq!(name, "Paid");
            assert_eq!(
                url.as_ref().unwrap().as_str(),
                "https://music.example.com/buy?song=2"
            );
        }
        other => panic!("unexpected alert {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn inserted_song_plays_next() {
    let h = Harness::new(&format!(
        r#"{THREE_SONGS}
        [[songs]]
        id = "4"
        name = "Four"
        url = "https://cdn.example.com/4.flac"
        size = 1000
        "#
    ));
    let songs = h.show("playlist:1");

    assert_eq!(h.player.insert_next(h.song("4")), Route::PendingInjection);
    h.player.play_song(songs[0].clone()).await;
    assert_eq!(h.player.play_next(true).await, started("4"));
    assert_eq!(h.player.play_next(true).await, started("2"));
}

#[tokio::test(start_paused = true)]
async fn parked_placeholder_plays_once_loaded() {
    let mut h = Harness::new(
        r#"
        [[songs]]
        id = "1"
        name = "One"
        url = "https://cdn.example.com/1.flac"
        size = 1000

        [[songs]]
        id = "2"
        name = "Two"
        url = "https://cdn.example.com/2.flac"
        size = 1000

        [[views]]
        source = "playlist:big"
        songs = ["1", "2"]
        lazy = true
        "#,
    );
    let source = ViewSource::from("playlist:big");
    let songs = h.show("playlist:big");

    // The IDs behind the list are not known yet.
    assert_eq!(h.player.play_song(songs[1].clone()).await, PlayOutcome::Parked);
    assert!(h.played().is_empty());

    let ids = vec![SongId::from("1"), SongId::from("2")];
    for task in h.player.view_changed(source, Some(ids)) {
        task.await.unwrap();
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(h.played(), ["2"]);
    let events = h.events();
    assert!(statuses(&events).contains(&"Song is still loading, it plays once loaded"));
    assert_eq!(now_playing(&events), ["2"]);
}

#[tokio::test(start_paused = true)]
async fn parked_placeholder_plays_before_list_finishes_loading() {
    let h = Harness::with_config(
        r#"
        [[songs]]
        id = "1"
        url = "https://cdn.example.com/1.flac"
        size = 1000

        [[songs]]
        id = "2"
        url = "https://cdn.example.com/2.flac"
        size = 1000

        [[songs]]
        id = "3"
        url = "https://cdn.example.com/3.flac"
        size = 1000

        [[songs]]
        id = "4"
        url = "https://cdn.example.com/4.flac"
        size = 1000

        [[views]]
        source = "playlist:big"
        songs = ["1", "2", "3", "4"]
        lazy = true
        "#,
        Config {
            preload: false,
            placeholder_batch_size: 1,
            ..Config::default()
        },
    );
    let source = ViewSource::from("playlist:big");
    let songs = h.show("playlist:big");
    assert_eq!(h.player.play_song(songs[0].clone()).await, PlayOutcome::Parked);

    let ids = ["1", "2", "3", "4"].map(SongId::from).to_vec();
    let tasks = h.player.view_changed(source, Some(ids));

    // The first page is in at once; the rest follow 1.5 s apart.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.played(), ["1"]);
    assert!(tasks.iter().any(|task| !task.is_finished()));

    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(h.played(), ["1"]);
}

#[tokio::test(start_paused = true)]
async fn precheck_marks_unavailable_songs() {
    let h = Harness::new(
        r#"
        [[songs]]
        id = "1"
        url = "https://cdn.example.com/1.flac"

        [[songs]]
        id = "2"
        available = false

        [[views]]
        source = "search:q"
        songs = ["1", "2"]
        "#,
    );
    h.show("search:q");

    for task in h.player.view_changed(ViewSource::from("search:q"), None) {
        task.await.unwrap();
    }

    assert_eq!(
        h.memory.view.availability(&SongId::from("2")),
        Some(Availability::Unavailable)
    );
    assert_eq!(h.memory.view.availability(&SongId::from("1")), None);
}

#[tokio::test(start_paused = true)]
async fn radio_refills_near_the_end() {
    let mut h = Harness::new(
        r#"
        [[songs]]
        id = "1"
        url = "https://cdn.example.com/1.flac"
        size = 1

        [[songs]]
        id = "2"
        url = "https://cdn.example.com/2.flac"
        size = 1

        [[songs]]
        id = "3"
        url = "https://cdn.example.com/3.flac"
        size = 1

        [radio]
        source = "radio"
        batches = [["1", "2"], ["2", "3"]]
        "#,
    );

    assert_eq!(h.player.start_radio().await, started("1"));
    assert_eq!(h.player.on_playback_ended().await, started("2"));
    assert_eq!(h.player.on_playback_ended().await, started("3"));
    assert_eq!(h.player.on_playback_ended().await, PlayOutcome::Boundary);

    assert_eq!(h.played(), ["1", "2", "3"]);
    assert!(h
        .events()
        .iter()
        .any(|event| matches!(event, Event::QueueFinished { .. })));
}

#[tokio::test(start_paused = true)]
async fn next_song_is_preloaded() {
    let h = Harness::with_config(THREE_SONGS, Config::default());
    let songs = h.show("playlist:1");

    h.player.play_song(songs[0].clone()).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(h.memory.catalog.url_calls(), 2);
    let quality = h.player.quality();
    assert!(h
        .player
        .cached(&SongId::from("2"))
        .is_some_and(|song| song.stream(quality).is_some()));

    assert_eq!(h.player.play_next(true).await, started("2"));
    assert_eq!(h.memory.catalog.url_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn sessions_end_with_reason() {
    let h = Harness::new(THREE_SONGS);
    let songs = h.show("playlist:1");

    h.player.play_song(songs[0].clone()).await;
    h.memory.audio.set_position(Duration::from_secs(30));
    h.player.play_next(true).await;
    h.memory.audio.set_position(Duration::from_secs(200));
    h.player.on_playback_ended().await;
    h.player.stop().await;

    let ended: Vec<_> = h
        .memory
        .reports
        .ended
        .lock()
        .unwrap()
        .iter()
        .map(|end| (end.session.song_id.as_str().to_owned(), end.reason, end.played))
        .collect();
    assert_eq!(
        ended,
        [
            ("1".to_owned(), EndReason::Skipped, Duration::from_secs(30)),
            ("2".to_owned(), EndReason::Completed, Duration::from_secs(200)),
            ("3".to_owned(), EndReason::Interrupted, Duration::ZERO),
        ]
    );
    assert_eq!(h.memory.reports.begun.lock().unwrap().len(), 3);
    assert!(h.player.now_playing().is_none());
}

#[tokio::test(start_paused = true)]
async fn share_url_resolves_without_playing() {
    let h = Harness::new(THREE_SONGS);

    let url = h
        .player
        .share_url(&h.song("2"), &tokio_util::sync::CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(url.as_str(), "https://cdn.example.com/2.flac");
    assert!(h.played().is_empty());
    assert!(h.player.now_playing().is_none());
}
