//! Exponential backoff with jitter for startup calls that may fail transiently
//!
//! The reconcile loop has its own retry cadence; this is for calls made
//! outside it, such as the first secret backend login and the re-login
//! schedule of the renewal task.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::Error;

/// Backoff schedule
#[derive(Clone, Debug, PartialEq)]
pub struct Backoff {
    /// Maximum number of attempts (0 = unlimited)
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor between attempts
    pub multiplier: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl Backoff {
    /// Schedule giving up after `attempts` tries
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Delay before retry number `retry` (1-based), without jitter
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Scale `delay` by a random factor in [0.5, 1.5)
fn jittered(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}

/// Run `operation` until it succeeds, fails permanently or the schedule ends
///
/// Errors that are not retryable are returned at once. Cancellation during a
/// wait returns [`Error::Cancelled`].
pub async fn retry_with_backoff<F, Fut, T>(
    backoff: &Backoff,
    operation_name: &str,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !err.is_retryable() || backoff.exhausted(attempt) {
            error!(
                operation = %operation_name,
                attempt,
                error = %err,
                "operation failed, giving up"
            );
            return Err(err);
        }

        let delay = jittered(backoff.delay_for(attempt));
        warn!(
            operation = %operation_name,
            attempt,
            error = %err,
            delay_ms = delay.as_millis() as u64,
            "operation failed, retrying"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(attempts: u32) -> Backoff {
        Backoff {
            max_attempts: attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            multiplier: 2.0,
        }
    }

    #[rstest]
    #[case::first(1, 500)]
    #[case::second(2, 1000)]
    #[case::fourth(4, 4000)]
    #[case::capped(10, 30_000)]
    #[case::huge(u32::MAX, 30_000)]
    fn test_delay_schedule(#[case] retry: u32, #[case] millis: u64) {
        assert_eq!(
            Backoff::default().delay_for(retry),
            Duration::from_millis(millis)
        );
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..100 {
            let d = jittered(Duration::from_secs(10));
            assert!(d >= Duration::from_secs(5) && d < Duration::from_secs(15));
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result = retry_with_backoff(&fast(5), "login", &CancellationToken::new(), || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::secret_backend("connection refused"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_max_attempts() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<(), Error> =
            retry_with_backoff(&fast(3), "login", &CancellationToken::new(), || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(Error::transport("timeout"))
                }
            })
            .await;

        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<(), Error> =
            retry_with_backoff(&fast(0), "login", &CancellationToken::new(), || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(Error::config("bad address"))
                }
            })
            .await;

        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_unlimited_retries() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<(), Error> =
            retry_with_backoff(&Backoff::default(), "login", &cancel, || {
                let c = c.clone();
                let trigger = trigger.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) == 2 {
                        trigger.cancel();
                    }
                    Err(Error::secret_backend("sealed"))
                }
            })
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
