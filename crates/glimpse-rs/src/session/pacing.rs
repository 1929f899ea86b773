//! Optional pacing between searches.
//!
//! The orchestrator calls [`SearchPacer::acquire`] before every search.
//! [`Unpaced`] returns immediately; [`SlidingWindow`] enforces a minimum
//! interval and a per-window cap with a cooldown once the cap is hit.

use crate::BoxFuture;
use crate::config::RateLimitConfig;
use crate::error::{ResearchError, Result};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Gate that decides when the next search may start.
pub trait SearchPacer: Send + Sync {
    /// Wait until a search is allowed and record it. Cancellable.
    fn acquire<'a>(&'a self, cancel: &'a CancellationToken) -> BoxFuture<'a, Result<()>>;
}

/// No pacing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unpaced;

impl SearchPacer for Unpaced {
    fn acquire<'a>(&'a self, cancel: &'a CancellationToken) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(ResearchError::Cancelled);
            }
            Ok(())
        })
    }
}

/// Minimum interval plus a sliding-window cap with cooldown.
#[derive(Debug)]
pub struct SlidingWindow {
    config: RateLimitConfig,
    history: Mutex<VecDeque<Instant>>,
}

impl SlidingWindow {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// How long a search starting at `now` must wait.
    pub fn delay_at(&self, now: Instant) -> Duration {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        prune(&mut history, now, self.config.window);
        self.delay_with(&history, now)
    }

    fn delay_with(&self, history: &VecDeque<Instant>, now: Instant) -> Duration {
        let mut delay = Duration::ZERO;
        if let Some(last) = history.back() {
            let since = now.saturating_duration_since(*last);
            delay = delay.max(self.config.min_interval.saturating_sub(since));
        }
        if history.len() >= self.config.max_per_window as usize
            && let Some(oldest) = history.front()
        {
            let until_free = (*oldest + self.config.window).saturating_duration_since(now);
            delay = delay.max(until_free + self.config.cooldown);
        }
        delay
    }

    /// Record a search at `now`.
    pub fn record(&self, now: Instant) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        prune(&mut history, now, self.config.window);
        history.push_back(now);
    }
}

fn prune(history: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = history.front() {
        if now.saturating_duration_since(*front) >= window {
            history.pop_front();
        } else {
            break;
        }
    }
}

impl SearchPacer for SlidingWindow {
    fn acquire<'a>(&'a self, cancel: &'a CancellationToken) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            loop {
                let delay = self.delay_at(Instant::now());
                if delay.is_zero() {
                    break;
                }
                debug!("Pacing search for {:?}", delay);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ResearchError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if cancel.is_cancelled() {
                return Err(ResearchError::Cancelled);
            }
            self.record(Instant::now());
            Ok(())
        })
    }
}

/// Build the pacer a config asks for.
pub fn pacer_for(limit: Option<&RateLimitConfig>) -> Box<dyn SearchPacer> {
    match limit {
        Some(limit) => Box::new(SlidingWindow::new(limit.clone())),
        None => Box::new(Unpaced),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(min_ms: u64, max: u32, window_ms: u64, cooldown_ms: u64) -> RateLimitConfig {
        RateLimitConfig {
            min_interval: Duration::from_millis(min_ms),
            max_per_window: max,
            window: Duration::from_millis(window_ms),
            cooldown: Duration::from_millis(cooldown_ms),
        }
    }

    #[test]
    fn first_search_is_immediate() {
        let pacer = SlidingWindow::new(limit(1000, 5, 60_000, 0));
        assert_eq!(pacer.delay_at(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn min_interval_enforced() {
        let pacer = SlidingWindow::new(limit(1000, 5, 60_000, 0));
        let t0 = Instant::now();
        pacer.record(t0);
        assert_eq!(
            pacer.delay_at(t0 + Duration::from_millis(400)),
            Duration::from_millis(600)
        );
        assert_eq!(pacer.delay_at(t0 + Duration::from_millis(1500)), Duration::ZERO);
    }

    #[test]
    fn full_window_adds_cooldown() {
        let pacer = SlidingWindow::new(limit(0, 2, 10_000, 3_000));
        let t0 = Instant::now();
        pacer.record(t0);
        pacer.record(t0 + Duration::from_millis(1_000));
        // Oldest leaves the window at t0+10s, then 3s cooldown.
        assert_eq!(
            pacer.delay_at(t0 + Duration::from_millis(2_000)),
            Duration::from_millis(11_000)
        );
        // Once the oldest expired, the window has room again.
        assert_eq!(pacer.delay_at(t0 + Duration::from_millis(10_000)), Duration::ZERO);
    }

    #[tokio::test]
    async fn unpaced_is_immediate_but_respects_cancel() {
        let cancel = CancellationToken::new();
        assert!(Unpaced.acquire(&cancel).await.is_ok());
        cancel.cancel();
        assert!(Unpaced.acquire(&cancel).await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn acquire_waits_then_records() {
        let pacer = SlidingWindow::new(limit(30, 10, 60_000, 0));
        let cancel = CancellationToken::new();
        let start = Instant::now();
        pacer.acquire(&cancel).await.unwrap();
        pacer.acquire(&cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn cancel_interrupts_wait() {
        let pacer = SlidingWindow::new(limit(60_000, 10, 60_000, 0));
        let cancel = CancellationToken::new();
        pacer.acquire(&cancel).await.unwrap();
        cancel.cancel();
        assert!(pacer.acquire(&cancel).await.unwrap_err().is_cancelled());
    }
}
