//! Retry with exponential backoff, observing cancellation.

use std::{future::Future, time::Duration};

use exponential_backoff::Backoff;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Attempt budget of a retried operation.
#[serde_as]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub attempts: u32,

    /// Time allowed per attempt.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub timeout: Duration,

    /// Delay after the first failure.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub min_delay: Duration,

    /// Upper bound of the delay between attempts.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout: Duration::from_secs(12),
            min_delay: Duration::from_millis(1200),
            max_delay: Duration::from_millis(5000),
        }
    }
}

/// Runs `op` until it succeeds, fails with an error `is_retryable` rejects,
/// or the policy runs out of attempts.
///
/// Every attempt is bounded by the policy timeout. Cancellation of `cancel`
/// aborts the running attempt and any pending backoff delay, and yields an
/// error of kind `Cancelled`, which is never retried.
pub async fn with_retry<T, F, Fut, P>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
    is_retryable: P,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&Error) -> bool,
{
    let backoff = Backoff::new(policy.attempts, policy.min_delay, policy.max_delay);

    let mut attempt = 0;
    for delay in &backoff {
        attempt += 1;

        let result = tokio::select! {
            biased;

            () = cancel.cancelled() => return Err(Error::cancelled("request superseded")),
            result = tokio::time::timeout(policy.timeout, op(attempt)) => match result {
                Ok(result) => result,
                Err(elapsed) => Err(elapsed.into()),
            },
        };

        let e = match result {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if e.is_cancelled() || !is_retryable(&e) {
            return Err(e);
        }

        match delay {
            Some(delay) => {
                debug!(
                    "attempt {attempt}/{} failed: {e}; retrying in {:.1}s",
                    policy.attempts,
                    delay.as_secs_f32()
                );
                tokio::select! {
                    biased;

                    () = cancel.cancelled() => return Err(Error::cancelled("request superseded")),
                    () = tokio::time::sleep(delay) => {}
                }
            }
            None => {
                warn!("giving up after {attempt} attempts: {e}");
                return Err(e);
            }
        }
    }

    Err(Error::invalid_argument("retry policy allows no attempts"))
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use super::*;
    use crate::error::ErrorKind;

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(
            &policy(),
            &CancellationToken::new(),
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(Error::unavailable("flaky"))
                    } else {
                        Ok(attempt)
                    }
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_non_retryable_error() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(
            &policy(),
            &CancellationToken::new(),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::not_found("gone")) }
            },
            |e| e.kind != ErrorKind::NotFound,
        )
        .await;

        assert_eq!(result.unwrap_err().kind, ErrorKind::NotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_last_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(
            &policy(),
            &CancellationToken::new(),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::unavailable("down")) }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap_err().kind, ErrorKind::Unavailable);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_time_out() {
        let result: Result<()> = with_retry(
            &RetryPolicy {
                attempts: 1,
                ..policy()
            },
            &CancellationToken::new(),
            |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap_err().kind, ErrorKind::DeadlineExceeded);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff_delay() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let task = {
            let calls = Arc::clone(&calls);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                with_retry(
                    &policy(),
                    &cancel,
                    |_| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async { Err::<(), _>(Error::unavailable("down")) }
                    },
                    |_| true,
                )
                .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let started = tokio::time::Instant::now();
        let result = task.await.unwrap();
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < policy().min_delay);
    }
}
