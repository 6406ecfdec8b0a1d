//! Scenario harness around the in-memory collaborators.

#![allow(dead_code)]

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracklane::{
    config::Config,
    events::{Alert, Event},
    fixture::{Fixture, Memory},
    player::Player,
    song::{Song, SongId, ViewSource},
};

pub struct Harness {
    pub fixture: Fixture,
    pub memory: Memory,
    pub player: Player,
    events: UnboundedReceiver<Event>,
}

impl Harness {
    pub fn new(fixture: &str) -> Self {
        Self::with_config(
            fixture,
            Config {
                preload: false,
                ..Config::default()
            },
        )
    }

    pub fn with_config(fixture: &str, config: Config) -> Self {
        let fixture = Fixture::parse(fixture).unwrap();
        Self::with_memory(fixture.clone(), Memory::new(&fixture), config)
    }

    pub fn with_memory(fixture: Fixture, memory: Memory, config: Config) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let player = Player::new(config, memory.collaborators(), tx);
        Self {
            fixture,
            memory,
            player,
            events,
        }
    }

    pub fn song(&self, id: &str) -> Song {
        self.fixture.song(&SongId::from(id)).unwrap()
    }

    /// Shows a list of the fixture and returns its entries.
    pub fn show(&self, source: &str) -> Vec<Song> {
        let source = ViewSource::from(source);
        let view = self.fixture.view(&source).unwrap();
        let songs = self.fixture.view_songs(view);
        self.memory.view.show(source, songs.clone());
        songs
    }

    pub fn played(&self) -> Vec<String> {
        self.memory
            .audio
            .played()
            .iter()
            .map(|id| id.as_str().to_owned())
            .collect()
    }

    pub fn events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn statuses(events: &[Event]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Status { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

pub fn alerts(events: &[Event]) -> Vec<&Alert> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Alert { alert, .. } => Some(alert),
            _ => None,
        })
        .collect()
}

pub fn now_playing(events: &[Event]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::NowPlaying { id, .. } => Some(id.as_str()),
            _ => None,
        })
        .collect()
}

/// Three plain songs in one list.
pub const THREE_SONGS: &str = r#"
[[songs]]
id = "1"
name = "One"
artists = ["Artist"]
duration = 200
url = "https://cdn.example.com/1.flac"
size = 1000

[[songs]]
id = "2"
name = "Two"
artists = ["Artist"]
duration = 200
url = "https://cdn.example.com/2.flac"
size = 1000

[[songs]]
id = "3"
name = "Three"
artists = ["Artist"]
duration = 200
url = "https://cdn.example.com/3.flac"
size = 1000

[[views]]
source = "playlist:1"
songs = ["1", "2", "3"]
"#;
