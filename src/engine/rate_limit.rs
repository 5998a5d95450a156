//! Request rate limiting for the online engine.
//!
//! Sliding-window token bucket: at most N requests per minute, with the
//! wait-until-allowed time reported so the synthesis worker can sleep off
//! the excess instead of failing the sentence.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct RateLimiter {
    max_per_minute: u32,
    window: VecDeque<Instant>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_minute,
            window: VecDeque::new(),
        }
    }

    /// Try to take a token. On success the request is recorded; on failure
    /// the returned duration says how long until the oldest recorded
    /// request ages out of the window.
    pub fn try_acquire(&mut self) -> std::result::Result<(), Duration> {
        let now = Instant::now();
        let window_start = now - Duration::from_secs(60);

        while let Some(&first) = self.window.front() {
            if first < window_start {
                self.window.pop_front();
            } else {
                break;
            }
        }

        if self.window.len() >= self.max_per_minute as usize {
            if let Some(&oldest) = self.window.front() {
                let age = now.duration_since(oldest);
                return Err(Duration::from_secs(60).saturating_sub(age));
            }
        }

        self.window.push_back(now);
        Ok(())
    }

    /// Tokens left in the current window.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.max_per_minute.saturating_sub(self.window.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_within_limit() {
        let mut limiter = RateLimiter::new(5);
        for _ in 0..5 {
            assert!(limiter.try_acquire().is_ok());
        }
    }

    #[test]
    fn blocks_beyond_limit_with_retry_hint() {
        let mut limiter = RateLimiter::new(3);
        for _ in 0..3 {
            assert!(limiter.try_acquire().is_ok());
        }
        let wait = match limiter.try_acquire() {
            Err(d) => d,
            Ok(()) => unreachable!("fourth request must be limited"),
        };
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_secs(60));
    }

    #[test]
    fn remaining_counts_down() {
        let mut limiter = RateLimiter::new(4);
        assert_eq!(limiter.remaining(), 4);
        let _ = limiter.try_acquire();
        let _ = limiter.try_acquire();
        assert_eq!(limiter.remaining(), 2);
    }
}
