//! Sliding-window admission counter.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Distinct keys held before stale buckets are purged.
pub const DEFAULT_HIGH_WATER: usize = 20_000;

/// Admission decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admission {
    pub admitted: bool,
    /// Time until the oldest entry leaves the window. Zero when admitted.
    pub retry_after: Duration,
}

impl Admission {
    const fn admitted() -> Self {
        Self {
            admitted: true,
            retry_after: Duration::ZERO,
        }
    }

    /// Retry-After header value: whole seconds, at least 1.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs_f64().ceil();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let secs = secs as u64;
        secs.max(1)
    }
}

/// Per-key timestamp-log limiter.
///
/// A key's log only ever holds instants within `[now - window, now]` after a
/// check. The single mutex covers check-and-append so concurrent callers on
/// the same key are serialized.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    buckets: Mutex<HashMap<String, VecDeque<Instant>>>,
    high_water: usize,
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl SlidingWindowLimiter {
    pub fn new() -> Self {
        Self::with_high_water(DEFAULT_HIGH_WATER)
    }

    /// Limiter that purges stale keys once more than `high_water` are held.
    pub fn with_high_water(high_water: usize) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            high_water,
        }
    }

    /// Check and record one request for `key` at the current instant.
    pub fn allow(&self, key: &str, limit: u32, window: Duration) -> Admission {
        self.allow_at(key, limit, window, Instant::now())
    }

    /// Check and record one request for `key` at `now`.
    pub fn allow_at(&self, key: &str, limit: u32, window: Duration, now: Instant) -> Admission {
        let cutoff = now.checked_sub(window);
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);

        let bucket = buckets.entry(key.to_string()).or_default();
        if let Some(cutoff) = cutoff {
            while bucket.front().is_some_and(|t| *t <= cutoff) {
                bucket.pop_front();
            }
        }

        if bucket.len() >= limit as usize {
            let retry_after = bucket
                .front()
                .map_or(window, |oldest| window.saturating_sub(now - *oldest));
            return Admission {
                admitted: false,
                retry_after,
            };
        }

        bucket.push_back(now);

        if buckets.len() > self.high_water {
            let stale_cutoff = now.checked_sub(window * 2);
            let before = buckets.len();
            buckets.retain(|_, times| match (times.back(), stale_cutoff) {
                (None, _) => false,
                (Some(last), Some(cutoff)) => *last >= cutoff,
                (Some(_), None) => true,
            });
            tracing::debug!(
                purged = before - buckets.len(),
                remaining = buckets.len(),
                "Purged stale rate limit buckets"
            );
        }

        Admission::admitted()
    }

    /// Number of keys currently tracked.
    pub fn key_count(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(10);

    #[tokio::test(start_paused = true)]
    async fn test_admits_exactly_limit_within_window() {
        let limiter = SlidingWindowLimiter::new();
        let start = Instant::now();

        for i in 0..3 {
            let at = start + Duration::from_secs(i);
            assert!(limiter.allow_at("k", 3, WINDOW, at).admitted);
        }
        let rejected = limiter.allow_at("k", 3, WINDOW, start + Duration::from_secs(4));
        assert!(!rejected.admitted);
        assert!(rejected.retry_after > Duration::ZERO);
        assert!(rejected.retry_after <= WINDOW);
        // Oldest entry (t=0) leaves the window at t=10.
        assert_eq!(rejected.retry_after, Duration::from_secs(6));
        assert_eq!(rejected.retry_after_secs(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = SlidingWindowLimiter::new();
        let start = Instant::now();

        assert!(limiter.allow_at("k", 1, WINDOW, start).admitted);
        assert!(!limiter.allow_at("k", 1, WINDOW, start + Duration::from_secs(9)).admitted);
        assert!(limiter.allow_at("k", 1, WINDOW, start + WINDOW).admitted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let limiter = SlidingWindowLimiter::new();
        let now = Instant::now();

        assert!(limiter.allow_at("a", 1, WINDOW, now).admitted);
        assert!(limiter.allow_at("b", 1, WINDOW, now).admitted);
        assert!(!limiter.allow_at("a", 1, WINDOW, now).admitted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_does_not_extend_window() {
        let limiter = SlidingWindowLimiter::new();
        let start = Instant::now();

        assert!(limiter.allow_at("k", 2, WINDOW, start).admitted);
        assert!(limiter.allow_at("k", 2, WINDOW, start).admitted);
        for i in 1..5 {
            assert!(!limiter.allow_at("k", 2, WINDOW, start + Duration::from_secs(i)).admitted);
        }
        assert!(limiter.allow_at("k", 2, WINDOW, start + WINDOW).admitted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_keys_purged_past_high_water() {
        let limiter = SlidingWindowLimiter::with_high_water(2);
        tokio::time::advance(Duration::from_secs(100)).await;
        let start = Instant::now();

        assert!(limiter.allow_at("old-1", 5, WINDOW, start).admitted);
        assert!(limiter.allow_at("old-2", 5, WINDOW, start).admitted);
        let later = start + WINDOW * 3;
        assert!(limiter.allow_at("fresh", 5, WINDOW, later).admitted);

        assert_eq!(limiter.key_count(), 1);
    }

    #[test]
    fn test_retry_after_secs_rounds_up() {
        let admission = Admission {
            admitted: false,
            retry_after: Duration::from_millis(1200),
        };
        assert_eq!(admission.retry_after_secs(), 2);

        let tiny = Admission {
            admitted: false,
            retry_after: Duration::ZERO,
        };
        assert_eq!(tiny.retry_after_secs(), 1);
    }
}
