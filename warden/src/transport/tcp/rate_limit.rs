//! Per-connection sliding-window rate limiting.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// At most `max_requests` within any trailing `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_requests: usize,
    pub window: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_millis(60_000),
        }
    }
}

/// Timestamps of recently accepted requests.
///
/// Denied requests are not recorded, so a client hammering past the limit
/// does not extend its own penalty.
#[derive(Debug)]
pub struct SlidingWindow {
    limit: RateLimit,
    hits: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            hits: VecDeque::with_capacity(limit.max_requests.min(1024)),
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Record a request at `now` if the window has room.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.evict(now);
        if self.hits.len() >= self.limit.max_requests {
            return false;
        }
        self.hits.push_back(now);
        true
    }

    /// Requests still counted against the window at `now`.
    pub fn in_window(&mut self, now: Instant) -> usize {
        self.evict(now);
        self.hits.len()
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) >= self.limit.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hundred_and_first_request_is_denied() {
        let mut window = SlidingWindow::new(RateLimit::default());
        let start = Instant::now();

        let mut denied = 0;
        for i in 0..101u64 {
            if !window.try_acquire(start + Duration::from_millis(i)) {
                denied += 1;
            }
        }
        assert_eq!(denied, 1);
        assert!(!window.try_acquire(start + Duration::from_millis(200)));

        // every earlier hit has aged out
        assert!(window.try_acquire(start + Duration::from_millis(60_101)));
        assert_eq!(window.in_window(start + Duration::from_millis(60_101)), 1);
    }

    #[test]
    fn window_slides_one_hit_at_a_time() {
        let limit = RateLimit {
            max_requests: 2,
            window: Duration::from_secs(10),
        };
        let mut window = SlidingWindow::new(limit);
        let t0 = Instant::now();

        assert!(window.try_acquire(t0));
        assert!(window.try_acquire(t0 + Duration::from_secs(5)));
        assert!(!window.try_acquire(t0 + Duration::from_secs(9)));

        // first hit expires, second still counts
        assert!(window.try_acquire(t0 + Duration::from_secs(10)));
        assert!(!window.try_acquire(t0 + Duration::from_secs(11)));
    }

    #[test]
    fn denied_requests_are_not_recorded() {
        let limit = RateLimit {
            max_requests: 1,
            window: Duration::from_secs(1),
        };
        let mut window = SlidingWindow::new(limit);
        let t0 = Instant::now();

        assert!(window.try_acquire(t0));
        for ms in 100..900 {
            assert!(!window.try_acquire(t0 + Duration::from_millis(ms)));
        }
        assert_eq!(window.in_window(t0 + Duration::from_millis(900)), 1);
        assert!(window.try_acquire(t0 + Duration::from_secs(1)));
    }
}
