use std::collections::{HashMap, VecDeque};

use commonplace_shared::constants::{PRESENCE_RATE_LIMIT_MAX, PRESENCE_RATE_LIMIT_WINDOW_MS};
use commonplace_shared::types::Millis;

/// Sliding-window limiter keyed by sender peer id. Only admitted messages
/// occupy the window.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    windows: HashMap<String, VecDeque<Millis>>,
    window_ms: Millis,
    max: usize,
}

impl RateLimiter {
    pub fn new(window_ms: Millis, max: usize) -> Self {
        Self {
            windows: HashMap::new(),
            window_ms,
            max,
        }
    }

    /// Whether `peer` has room in its window at `now`. Records nothing.
    pub fn allows(&mut self, peer: &str, now: Millis) -> bool {
        let window_ms = self.window_ms;
        match self.windows.get_mut(peer) {
            Some(window) => {
                while window.front().is_some_and(|&seen| now - seen >= window_ms) {
                    window.pop_front();
                }
                window.len() < self.max
            }
            None => self.max > 0,
        }
    }

    /// Count one admitted message from `peer` at `now`.
    pub fn record(&mut self, peer: &str, now: Millis) {
        self.windows.entry(peer.to_string()).or_default().push_back(now);
    }

    /// Admit and record in one step, or refuse.
    pub fn check(&mut self, peer: &str, now: Millis) -> bool {
        if !self.allows(peer, now) {
            return false;
        }
        self.record(peer, now);
        true
    }

    /// Forget senders with nothing in their window.
    pub fn purge_stale(&mut self, now: Millis) {
        let window_ms = self.window_ms;
        self.windows.retain(|_, window| {
            window
                .back()
                .is_some_and(|&last| now - last < window_ms)
        });
    }

    pub fn tracked_peers(&self) -> usize {
        self.windows.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(PRESENCE_RATE_LIMIT_WINDOW_MS as Millis, PRESENCE_RATE_LIMIT_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eleventh_message_in_window_refused() {
        let mut limiter = RateLimiter::new(1000, 10);
        for i in 0..10 {
            assert!(limiter.check("peer", 5_000 + i * 10));
        }
        assert!(!limiter.check("peer", 5_500));
    }

    #[test]
    fn test_window_slides() {
        let mut limiter = RateLimiter::new(1000, 2);
        assert!(limiter.check("peer", 0));
        assert!(limiter.check("peer", 400));
        assert!(!limiter.check("peer", 900));
        // the message at 0 has left the window
        assert!(limiter.check("peer", 1000));
        assert!(!limiter.check("peer", 1300));
    }

    #[test]
    fn test_peers_limited_independently() {
        let mut limiter = RateLimiter::new(1000, 1);
        assert!(limiter.check("a", 0));
        assert!(!limiter.check("a", 1));
        assert!(limiter.check("b", 1));
    }

    #[test]
    fn test_refused_peek_records_nothing() {
        let mut limiter = RateLimiter::new(1000, 2);
        for _ in 0..5 {
            assert!(limiter.allows("peer", 0));
        }
        limiter.record("peer", 0);
        limiter.record("peer", 10);
        assert!(!limiter.allows("peer", 20));
        assert!(limiter.allows("peer", 1000));
    }

    #[test]
    fn test_purge_stale() {
        let mut limiter = RateLimiter::new(1000, 5);
        limiter.check("old", 0);
        limiter.check("fresh", 1_900);
        limiter.purge_stale(2_000);
        assert_eq!(limiter.tracked_peers(), 1);
    }
}
