//! Playback reporting sessions.
//!
//! A session begins when audio for a song has actually started and ends
//! when another song starts or playback stops. Sinks receive both ends; a
//! failing sink is logged and otherwise ignored.

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use serde::Serialize;
use serde_repr::{Deserialize_repr, Serialize_repr};
use serde_with::{serde_as, DurationSeconds};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    error::Result,
    quality::QualityLevel,
    song::{Song, SongId, ViewSource},
};

/// Why a session ended.
#[derive(
    Copy, Clone, Debug, Default, Hash, Serialize_repr, Deserialize_repr, PartialEq, Eq,
)]
#[repr(u8)]
pub enum EndReason {
    /// The song played to its end.
    #[default]
    Completed = 0,

    /// The user moved on.
    Skipped = 1,

    /// Playback stopped or another request took over.
    Interrupted = 2,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlaybackSession {
    pub id: Uuid,
    pub song_id: SongId,
    pub source: Option<ViewSource>,
    #[serde(with = "time::serde::timestamp")]
    pub started_at: OffsetDateTime,
    pub quality: QualityLevel,
    pub used_unblock: bool,
    /// Version of the playback request that started the session.
    pub version: u64,
}

/// Completed session as handed to sinks.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionEnd {
    #[serde(flatten)]
    pub session: PlaybackSession,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub played: Duration,
    pub reason: EndReason,
}

#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn begin(&self, session: &PlaybackSession) -> Result<()>;

    async fn complete(&self, end: &SessionEnd) -> Result<()>;
}

#[derive(Default)]
pub struct Reporter {
    sink: Option<Arc<dyn ReportSink>>,
    current: Mutex<Option<PlaybackSession>>,
}

impl Reporter {
    #[must_use]
    pub fn new(sink: Option<Arc<dyn ReportSink>>) -> Self {
        Self {
            sink,
            current: Mutex::new(None),
        }
    }

    /// Begins a session for `song`. Returns the session that was open
    /// before, which the caller completes with [`complete`](Self::complete).
    pub async fn begin(
        &self,
        song: &Song,
        quality: QualityLevel,
        version: u64,
    ) -> Option<PlaybackSession> {
        let session = PlaybackSession {
            id: Uuid::new_v4(),
            song_id: song.id.clone(),
            source: song.view_source.clone(),
            started_at: OffsetDateTime::now_utc(),
            quality,
            used_unblock: song.is_unblocked(),
            version,
        };

        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(session.clone());

        debug!("report session {} began for {song}", session.id);
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.begin(&session).await {
                warn!("could not report start of {song}: {e}");
            }
        }

        previous
    }

    /// Ends the open session, if any.
    pub async fn finish(&self, played: Duration, reason: EndReason) {
        let session = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            self.complete(session, played, reason).await;
        }
    }

    pub async fn complete(&self, session: PlaybackSession, played: Duration, reason: EndReason) {
        debug!(
            "report session {} {reason} after {}s",
            session.id,
            played.as_secs()
        );

        let end = SessionEnd {
            session,
            played,
            reason,
        };
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.complete(&end).await {
                warn!("could not report end of {}: {e}", end.session.song_id);
            }
        }
    }

    #[must_use]
    pub fn current(&self) -> Option<PlaybackSession> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
