//! Bounded background work on behalf of the visible list.
//!
//! Enrichment tasks, such as loading placeholder pages or pre-checking
//! availability, run through a counting semaphore so that a large list does
//! not flood the catalog. All tasks of a list are cancelled together when
//! another list is shown.

use std::{
    future::Future,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::{sync::Semaphore, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::song::ViewSource;

pub struct Enricher {
    permits: Arc<Semaphore>,
    current: Mutex<Option<(ViewSource, CancellationToken)>>,
}

impl Enricher {
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            current: Mutex::new(None),
        }
    }

    /// Starts a new generation of work for the list `source`, cancelling all
    /// work of the previous list.
    pub fn begin_view(&self, source: ViewSource) -> CancellationToken {
        let token = CancellationToken::new();
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((previous, cancel)) = current.replace((source.clone(), token.clone())) {
            if previous != source {
                debug!("cancelling enrichment of {previous}");
            }
            cancel.cancel();
        }
        token
    }

    /// Token of the list currently being enriched.
    #[must_use]
    pub fn token(&self) -> Option<CancellationToken> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(_, token)| token.clone())
    }

    /// Cancels all work without starting a new generation.
    pub fn cancel(&self) {
        if let Some((_, token)) = self.current.lock().unwrap_or_else(PoisonError::into_inner).take() {
            token.cancel();
        }
    }

    /// Runs `task` once a permit is free. Yields `None` when `cancel` fires
    /// first.
    pub fn spawn<F, T>(&self, cancel: CancellationToken, task: F) -> JoinHandle<Option<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let _permit = tokio::select! {
                biased;

                () = cancel.cancelled() => return None,
                permit = permits.acquire_owned() => permit.ok()?,
            };

            tokio::select! {
                biased;

                () = cancel.cancelled() => None,
                output = task => Some(output),
            }
        })
    }
}
