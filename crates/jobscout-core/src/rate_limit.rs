//! Proactive per-provider request limiting.
//!
//! Keeps each provider under its "N requests per minute" allowance before a
//! request is even sent, so that the server rarely gets a chance to answer
//! 429. The window is a trailing 60 seconds over recorded request start
//! times.
//!
//! # Example
//!
//! ```rust,no_run
//! use jobscout_core::rate_limit::RateLimiter;
//!
//! # async fn run() {
//! let limiter = RateLimiter::new(3);
//! for _ in 0..4 {
//!     // The fourth call waits until the first one leaves the window.
//!     limiter.wait_if_needed().await;
//! }
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60);
const SAFETY_BUFFER: Duration = Duration::from_secs(1);

/// Sliding-window limiter for one provider.
///
/// Clones share the same window. The lock is held across the wait, so
/// concurrent callers are admitted one at a time and the check-then-record
/// step stays atomic.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    max_requests_per_minute: u32,
    /// Start times of requests inside the trailing window, oldest first.
    request_times: Arc<Mutex<VecDeque<Instant>>>,
}

impl RateLimiter {
    /// A limit of 0 disables limiting.
    pub fn new(max_requests_per_minute: u32) -> Self {
        Self {
            max_requests_per_minute,
            request_times: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn max_requests_per_minute(&self) -> u32 {
        self.max_requests_per_minute
    }

    /// Wait until the window has room, then record this request.
    pub async fn wait_if_needed(&self) {
        if self.max_requests_per_minute == 0 {
            return;
        }
        let limit = self.max_requests_per_minute as usize;

        let mut times = self.request_times.lock().await;
        prune(&mut times, Instant::now());

        if times.len() >= limit
            && let Some(&oldest) = times.front()
        {
            let age = Instant::now().saturating_duration_since(oldest);
            let wait = (WINDOW + SAFETY_BUFFER).saturating_sub(age);
            if !wait.is_zero() {
                tracing::info!(
                    wait_secs = wait.as_secs_f64(),
                    limit = self.max_requests_per_minute,
                    "Rate limiting: waiting to stay under requests/minute"
                );
                tokio::time::sleep(wait).await;
                prune(&mut times, Instant::now());
            }
        }

        times.push_back(Instant::now());
    }

    /// Number of requests currently counted against the window.
    pub async fn in_window(&self) -> usize {
        let mut times = self.request_times.lock().await;
        prune(&mut times, Instant::now());
        times.len()
    }
}

/// Drop timestamps that are 60 seconds old or older.
fn prune(times: &mut VecDeque<Instant>, now: Instant) {
    while let Some(&oldest) = times.front() {
        if now.saturating_duration_since(oldest) >= WINDOW {
            times.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn calls_under_the_limit_do_not_wait() {
        let limiter = RateLimiter::new(3);
        let start = Instant::now();

        for _ in 0..3 {
            limiter.wait_if_needed().await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.in_window().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fourth_call_waits_for_oldest_to_leave_window() {
        let limiter = RateLimiter::new(3);
        let start = Instant::now();

        for _ in 0..3 {
            limiter.wait_if_needed().await;
        }
        limiter.wait_if_needed().await;

        let elapsed = start.elapsed();
        assert!(
            elapsed >= WINDOW,
            "fourth request should wait for a full window, waited {elapsed:?}"
        );
        assert!(elapsed <= WINDOW + SAFETY_BUFFER + Duration::from_millis(100));
        // The first three requests have aged out.
        assert_eq!(limiter.in_window().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_is_shortened_by_time_already_passed() {
        let limiter = RateLimiter::new(2);
        limiter.wait_if_needed().await;
        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.wait_if_needed().await;

        let start = Instant::now();
        limiter.wait_if_needed().await;
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_secs(31));
        assert!(elapsed < Duration::from_secs(32));
        assert_eq!(limiter.in_window().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entries_are_pruned_without_waiting() {
        let limiter = RateLimiter::new(1);
        limiter.wait_if_needed().await;
        tokio::time::advance(Duration::from_secs(61)).await;

        let start = Instant::now();
        limiter.wait_if_needed().await;

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.in_window().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_limit_is_unlimited() {
        let limiter = RateLimiter::new(0);
        let start = Instant::now();

        for _ in 0..50 {
            limiter.wait_if_needed().await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.in_window().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn window_never_exceeds_limit() {
        let limiter = RateLimiter::new(3);
        for _ in 0..10 {
            limiter.wait_if_needed().await;
            assert!(limiter.in_window().await <= 3);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn clones_share_the_window() {
        let limiter = RateLimiter::new(1);
        let clone = limiter.clone();
        limiter.wait_if_needed().await;

        let start = Instant::now();
        clone.wait_if_needed().await;

        assert!(start.elapsed() >= WINDOW);
    }
}
