//! Events emitted by the player for the presentation layer.
//!
//! Events replace direct UI updates: the player sends them over an unbounded
//! channel and never assumes which thread receives them. Every event that
//! belongs to a playback request carries the request's scope version, so
//! receivers can drop events of superseded requests.
//!
//! # Example
//!
//! ```rust
//! use tracklane::events::Event;
//!
//! fn handle_event(event: Event) {
//!     match event {
//!         Event::NowPlaying { name, .. } => println!("Now playing: {name}"),
//!         Event::Alert { alert, .. } => eprintln!("{alert}"),
//!         _ => {}
//!     }
//! }
//! ```

use std::fmt;

use serde::Serialize;
use url::Url;

use crate::song::SongId;

/// Modal notification shown for manual actions only.
///
/// Automatic advance never raises alerts, it only reports status text.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Alert {
    /// The catalog no longer has the song.
    NotAvailable { name: String },

    /// The song belongs to a paid album. `url` links to the purchase page
    /// when one is configured.
    PurchaseRequired { name: String, url: Option<Url> },

    /// The stream could not be fetched after all retries.
    Failed { name: String },
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAvailable { name } => write!(f, "{name} is not available"),
            Self::PurchaseRequired { name, url: Some(url) } => {
                write!(f, "{name} requires purchasing the album: {url}")
            }
            Self::PurchaseRequired { name, url: None } => {
                write!(f, "{name} requires purchasing the album")
            }
            Self::Failed { name } => write!(f, "failed to play {name}"),
        }
    }
}

/// Events emitted by the [`Player`](crate::player::Player).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// A playback request started resolving a song.
    Loading {
        version: u64,
        song_id: SongId,
        name: String,
    },

    /// Status line text.
    Status { version: u64, text: String },

    /// Audio output started for a song.
    ///
    /// Emitted only for the current request, after the audio engine
    /// confirmed the start.
    NowPlaying {
        version: u64,
        id: SongId,
        name: String,
        artist: String,
        used_unblock: bool,
        trial: bool,
    },

    /// Modal notification for a manual action.
    Alert { version: u64, alert: Alert },

    /// Automatic advance reached the end of a sequential queue.
    QueueFinished { version: u64 },
}

impl Event {
    /// Scope version of the request this event belongs to.
    #[must_use]
    pub fn version(&self) -> u64 {
        match self {
            Self::Loading { version, .. }
            | Self::Status { version, .. }
            | Self::NowPlaying { version, .. }
            | Self::Alert { version, .. }
            | Self::QueueFinished { version } => *version,
        }
    }
}
