//! Admission control for executor calls.
//!
//! Sliding-window log: the admission instants of the last `window` are kept
//! in order. A caller is admitted while fewer than `max_calls` remain in the
//! window; otherwise it sleeps until the oldest admission leaves the window
//! and checks again. The lock is only held for a single check, never across
//! the sleep, so waiters do not block each other from re-checking.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::trace;

/// Bounds how many calls may start within any rolling `window`.
///
/// Thread-safe; designed to be shared via `Arc<RateLimiter>`.
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    admissions: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// `max_calls` below 1 is treated as 1.
    pub fn new(max_calls: usize, window: Duration) -> Self {
        let max_calls = max_calls.max(1);
        Self {
            max_calls,
            window,
            admissions: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Wait until a call may start, then count it as admitted.
    pub async fn acquire(&self) {
        loop {
            let wait = match self.try_admit().await {
                Ok(()) => return,
                Err(wait) => wait,
            };
            trace!(wait_ms = wait.as_millis() as u64, "admission window full");
            sleep(wait).await;
            // Re-check: another waiter may already have taken the freed slot.
        }
    }

    /// Admit immediately if there is room, otherwise return how long until
    /// the oldest admission leaves the window.
    pub async fn try_admit(&self) -> Result<(), Duration> {
        let mut admissions = self.admissions.lock().await;
        let now = Instant::now();
        evict_expired(&mut admissions, now, self.window);

        if admissions.len() < self.max_calls {
            admissions.push_back(now);
            return Ok(());
        }

        let oldest = admissions.front().copied().unwrap_or(now);
        Err(self.window.saturating_sub(now.duration_since(oldest)))
    }

    /// Number of admissions still inside the current window.
    pub async fn admitted_in_window(&self) -> usize {
        let mut admissions = self.admissions.lock().await;
        evict_expired(&mut admissions, Instant::now(), self.window);
        admissions.len()
    }
}

/// Admissions are recorded in order, so expired ones form a prefix.
fn evict_expired(admissions: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while admissions
        .front()
        .is_some_and(|t| now.duration_since(*t) >= window)
    {
        admissions.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_up_to_capacity_is_immediate() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire().await;
        }

        assert_eq!(Instant::now(), start);
        assert_eq!(limiter.admitted_in_window().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn call_over_capacity_waits_for_the_window() {
        let window = Duration::from_secs(10);
        let limiter = RateLimiter::new(2, window);
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        assert!(limiter.try_admit().await.is_err());

        limiter.acquire().await;
        assert!(Instant::now() - start >= window);
    }

    #[tokio::test(start_paused = true)]
    async fn try_admit_reports_remaining_wait() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10));
        limiter.acquire().await;

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(limiter.try_admit().await, Err(Duration::from_secs(6)));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(limiter.try_admit().await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_capacity_is_clamped() {
        let limiter = RateLimiter::new(0, Duration::from_secs(1));
        assert_eq!(limiter.max_calls(), 1);
        limiter.acquire().await;
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_never_exceed_capacity_in_any_window() {
        let window = Duration::from_secs(5);
        let max_calls = 3;
        let limiter = Arc::new(RateLimiter::new(max_calls, window));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }

        let mut admitted = Vec::new();
        for handle in handles {
            admitted.push(handle.await.unwrap());
        }
        admitted.sort();

        // Any half-open interval [t, t + window) holds at most max_calls admissions.
        for (i, t) in admitted.iter().enumerate() {
            let in_window = admitted[i..]
                .iter()
                .take_while(|u| u.duration_since(*t) < window)
                .count();
            assert!(in_window <= max_calls, "{in_window} admissions within {window:?}");
        }

        // 10 calls at 3 per window need at least three full windows.
        assert!(*admitted.last().unwrap() - start >= window * 3);
    }
}
