//! Bounded attempts with backoff, per-attempt timeouts, and cancellation.
//!
//! One primitive shared by every step that waits on the outside world: the
//! Content Provider's location-match retry loop (10 attempts, fixed 500 ms),
//! the content-type probe (one attempt, 2 s), and render-context load waits.

use crate::error::ResearchError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Configuration for a bounded attempt loop.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts allowed (minimum 1).
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Backoff multiplier (1.0 = fixed delay, 2.0 = exponential).
    pub multiplier: f64,
    /// Whether to add jitter to prevent thundering herd.
    pub jitter: bool,
    /// Time limit for each individual attempt. `None` = unbounded.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: true,
            attempt_timeout: None,
        }
    }
}

impl RetryConfig {
    /// A single attempt bounded by `timeout`.
    pub fn once_within(timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            attempt_timeout: Some(timeout),
            ..Default::default()
        }
    }

    /// `attempts` tries separated by a fixed `delay`, no jitter.
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: attempts,
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter: false,
            attempt_timeout: None,
        }
    }

    /// Set the per-attempt timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Calculate the delay after a given failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.jitter {
            // Deterministic jitter keyed on the attempt number; no rand needed.
            let jitter_factor = match attempt % 4 {
                0 => 0.75,
                1 => 0.90,
                2 => 0.60,
                3 => 0.85,
                _ => 0.80,
            };
            Duration::from_secs_f64(capped * jitter_factor)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

/// What a single attempt asks the loop to do on failure.
#[derive(Debug)]
pub enum Step<E> {
    /// Try again after the backoff delay (if attempts remain).
    Retry(E),
    /// Stop immediately with this error.
    Abort(E),
}

/// Why a bounded attempt loop gave up.
#[derive(Debug, PartialEq, Eq)]
pub enum AttemptError<E> {
    /// The cancellation token was revoked.
    Cancelled,
    /// The last attempt exceeded `attempt_timeout`.
    TimedOut,
    /// Every attempt asked for a retry; carries the last error.
    Exhausted(E),
    /// An attempt returned [`Step::Abort`].
    Aborted(E),
}

impl<E: std::fmt::Display> AttemptError<E> {
    /// Map into a [`ResearchError`], keeping cancellation distinct.
    pub fn into_research(self, wrap: impl FnOnce(String) -> ResearchError) -> ResearchError {
        match self {
            AttemptError::Cancelled => ResearchError::Cancelled,
            AttemptError::TimedOut => wrap("timed out".to_string()),
            AttemptError::Exhausted(e) | AttemptError::Aborted(e) => wrap(e.to_string()),
        }
    }
}

/// Run `op` up to `config.max_attempts` times.
///
/// Each attempt (and each backoff sleep) races the cancellation token. A
/// timed-out attempt counts as a retryable failure until attempts run out.
pub async fn attempt<T, E, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, AttemptError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Step<E>>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut last: Option<AttemptError<E>> = None;

    for n in 0..max_attempts {
        if n > 0 {
            let delay = config.delay_for_attempt(n - 1);
            trace!("attempt {}/{} after {:?}", n + 1, max_attempts, delay);
            tokio::select! {
                _ = cancel.cancelled() => return Err(AttemptError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(AttemptError::Cancelled);
        }

        let fut = op(n);
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(AttemptError::Cancelled),
            r = run_bounded(config.attempt_timeout, fut) => r,
        };

        match outcome {
            Some(Ok(value)) => return Ok(value),
            Some(Err(Step::Abort(e))) => return Err(AttemptError::Aborted(e)),
            Some(Err(Step::Retry(e))) => last = Some(AttemptError::Exhausted(e)),
            None => {
                debug!("attempt {}/{} timed out", n + 1, max_attempts);
                last = Some(AttemptError::TimedOut);
            }
        }
    }

    Err(last.unwrap_or(AttemptError::TimedOut))
}

async fn run_bounded<F: Future>(limit: Option<Duration>, fut: F) -> Option<F::Output> {
    match limit {
        Some(d) => tokio::time::timeout(d, fut).await.ok(),
        None => Some(fut.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn default_is_single_attempt() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 1);
        assert!(config.attempt_timeout.is_none());
    }

    #[test]
    fn delay_increases_exponentially() {
        let config = RetryConfig {
            jitter: false,
            max_attempts: 5,
            ..Default::default()
        };
        let d0 = config.delay_for_attempt(0);
        let d1 = config.delay_for_attempt(1);
        let d2 = config.delay_for_attempt(2);

        assert!(d1 > d0, "d1={d1:?} should be > d0={d0:?}");
        assert!(d2 > d1, "d2={d2:?} should be > d1={d1:?}");
    }

    #[test]
    fn delay_capped_at_max() {
        let config = RetryConfig {
            jitter: false,
            max_delay: Duration::from_secs(2),
            max_attempts: 10,
            ..Default::default()
        };
        assert!(config.delay_for_attempt(10) <= Duration::from_secs(2));
    }

    #[test]
    fn fixed_delay_is_constant() {
        let config = RetryConfig::fixed(10, Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(7), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let config = RetryConfig::fixed(5, Duration::from_millis(1));
        let result: Result<u32, AttemptError<String>> =
            attempt(&config, &CancellationToken::new(), |n| {
                c.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Step::Retry(format!("not yet ({n})")))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_carries_last_error() {
        let config = RetryConfig::fixed(3, Duration::from_millis(1));
        let result: Result<(), _> = attempt(&config, &CancellationToken::new(), |n| async move {
            Err(Step::Retry(format!("miss {n}")))
        })
        .await;
        assert_eq!(result, Err(AttemptError::Exhausted("miss 2".to_string())));
    }

    #[tokio::test]
    async fn abort_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let config = RetryConfig::fixed(10, Duration::from_millis(1));
        let result: Result<(), _> = attempt(&config, &CancellationToken::new(), |_| {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err(Step::Abort("restricted")) }
        })
        .await;
        assert_eq!(result, Err(AttemptError::Aborted("restricted")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempt_timeout_reports_timed_out() {
        let config = RetryConfig::once_within(Duration::from_millis(10));
        let result: Result<(), AttemptError<String>> =
            attempt(&config, &CancellationToken::new(), |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert_eq!(result, Err(AttemptError::TimedOut));
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let config = RetryConfig::fixed(3, Duration::from_millis(1));
        let result: Result<(), AttemptError<String>> =
            attempt(&config, &cancel, |_| async { Ok(()) }).await;
        assert_eq!(result, Err(AttemptError::Cancelled));
    }

    #[tokio::test]
    async fn cancel_during_backoff() {
        let cancel = CancellationToken::new();
        let c = cancel.clone();
        let config = RetryConfig::fixed(3, Duration::from_secs(30));
        let handle = tokio::spawn(async move {
            attempt(&config, &c, |_| async { Err::<(), _>(Step::Retry("again")) }).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let result = handle.await.unwrap();
        assert_eq!(result, Err(AttemptError::Cancelled));
    }

    #[test]
    fn into_research_keeps_cancellation_distinct() {
        let err: AttemptError<String> = AttemptError::Cancelled;
        assert!(err.into_research(ResearchError::Fetch).is_cancelled());
        let err = AttemptError::Exhausted("url mismatch".to_string());
        assert_eq!(
            err.into_research(ResearchError::Fetch),
            ResearchError::Fetch("url mismatch".into())
        );
    }
}
