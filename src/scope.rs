//! Versioned cancellation scopes for playback requests.
//!
//! Every playback request begins a [`Scope`]. Beginning a scope cancels the
//! one before it, so at most one request is current at any time. Steps of a
//! request check [`RequestScope::is_current`] before any visible effect:
//! starting audio, announcing the song, or opening a report session.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, PoisonError,
    },
    time::Duration,
};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Handle of one playback request.
#[derive(Clone, Debug)]
pub struct Scope {
    pub version: u64,
    pub token: CancellationToken,
}

impl Scope {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Child token that is cancelled with this scope or on its own.
    #[must_use]
    pub fn child(&self) -> CancellationToken {
        self.token.child_token()
    }
}

#[derive(Debug)]
pub struct RequestScope {
    current: Mutex<Option<Scope>>,
    version: AtomicU64,
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RequestScope {
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            current: Mutex::new(None),
            version: AtomicU64::new(0),
            last_request: Mutex::new(None),
            min_interval,
        }
    }

    /// Begins a new scope, cancelling the current one.
    pub fn begin(&self) -> Scope {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let scope = Scope {
            version,
            token: CancellationToken::new(),
        };

        if let Some(previous) = current.replace(scope.clone()) {
            trace!("request {} superseded by {version}", previous.version);
            previous.token.cancel();
        }

        scope
    }

    /// Version of the most recent scope, `0` before the first.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_current(&self, version: u64) -> bool {
        self.version() == version
    }

    /// Whether `version` is current and `token` is its live token.
    #[must_use]
    pub fn is_current_and_bound_to(&self, version: u64, token: &CancellationToken) -> bool {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        current.as_ref().is_some_and(|scope| {
            scope.version == version && !scope.token.is_cancelled() && !token.is_cancelled()
        }) && self.is_current(version)
    }

    /// Spaces out back-to-back requests by the minimum interval. The wait
    /// ends early with `Cancelled` when a newer scope begins.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` when `scope` is superseded while waiting.
    pub async fn throttle(&self, scope: &Scope) -> Result<()> {
        let wait = {
            let mut last_request = self.last_request.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            let next_slot = last_request
                .map(|last| last + self.min_interval)
                .filter(|slot| *slot > now)
                .unwrap_or(now);
            *last_request = Some(next_slot);
            next_slot - now
        };

        if !wait.is_zero() {
            trace!("throttling request {} for {}ms", scope.version, wait.as_millis());
            tokio::select! {
                biased;

                () = scope.token.cancelled() => {
                    return Err(Error::cancelled(format!("request {} superseded", scope.version)));
                }
                () = tokio::time::sleep(wait) => {}
            }
        }

        if scope.is_cancelled() {
            return Err(Error::cancelled(format!("request {} superseded", scope.version)));
        }
        Ok(())
    }

    /// Cancels the current scope without beginning a new one.
    pub fn cancel_active(&self) {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(scope) = current.as_ref() {
            scope.token.cancel();
        }
    }
}
