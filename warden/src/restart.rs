//! Bounded auto-restart with exponential backoff.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Consecutive restarts allowed before the instance is left in `error`.
    pub max_restarts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// A run this long without failure clears the restart counter.
    pub reset_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            reset_after: Duration::from_secs(600),
        }
    }
}

impl RestartPolicy {
    pub fn with_max_restarts(mut self, max_restarts: u32) -> Self {
        self.max_restarts = max_restarts;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max;
        self
    }

    pub fn with_reset_after(mut self, reset_after: Duration) -> Self {
        self.reset_after = reset_after;
        self
    }

    /// Delay before restart number `attempt` (1-based): base * 2^(attempt-1), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(2u32.pow(exponent))
            .min(self.max_backoff)
    }
}

/// Crash history for one instance.
#[derive(Debug, Clone, Default)]
pub struct RestartTracker {
    attempts: u32,
    running_since: Option<Instant>,
}

impl RestartTracker {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The instance reached `running`.
    pub fn record_running(&mut self, now: Instant) {
        self.running_since = Some(now);
    }

    /// Decide on a restart after a failure at `now`.
    ///
    /// Returns the attempt number and delay, or `None` once the budget is spent.
    pub fn next_attempt(&mut self, policy: &RestartPolicy, now: Instant) -> Option<(u32, Duration)> {
        if let Some(since) = self.running_since.take()
            && now.saturating_duration_since(since) >= policy.reset_after
        {
            self.attempts = 0;
        }
        if self.attempts >= policy.max_restarts {
            return None;
        }
        self.attempts += 1;
        Some((self.attempts, policy.backoff(self.attempts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(5), Duration::from_secs(16));
        assert_eq!(policy.backoff(6), Duration::from_secs(30));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn budget_is_bounded() {
        let policy = RestartPolicy::default().with_max_restarts(2);
        let mut tracker = RestartTracker::default();
        let now = Instant::now();

        assert_eq!(tracker.next_attempt(&policy, now), Some((1, Duration::from_secs(1))));
        assert_eq!(tracker.next_attempt(&policy, now), Some((2, Duration::from_secs(2))));
        assert_eq!(tracker.next_attempt(&policy, now), None);
        assert_eq!(tracker.attempts(), 2);
    }

    #[test]
    fn long_healthy_run_resets_counter() {
        let policy = RestartPolicy::default()
            .with_max_restarts(1)
            .with_reset_after(Duration::from_secs(60));
        let mut tracker = RestartTracker::default();
        let t0 = Instant::now();

        assert!(tracker.next_attempt(&policy, t0).is_some());
        tracker.record_running(t0);
        // crashed again quickly
        assert!(tracker.next_attempt(&policy, t0 + Duration::from_secs(5)).is_none());

        tracker.record_running(t0 + Duration::from_secs(10));
        assert_eq!(
            tracker.next_attempt(&policy, t0 + Duration::from_secs(70)),
            Some((1, Duration::from_secs(1)))
        );
    }
}
