//! Sliding-window rate counter (`spec.md` §4.6), grounded on
//! `netbox/gatekeeper.go`'s `RateLimiter`. Not a token bucket: the
//! counter simply zeroes once `reset_time` passes.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

const DEFAULT_REQUESTS_PER_MINUTE: u32 = 100;
const WINDOW: chrono::Duration = chrono::Duration::seconds(60);

struct State {
    requests_per_minute: u32,
    count: u32,
    reset_time: DateTime<Utc>,
}

pub struct RateLimiter {
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
                count: 0,
                reset_time: Utc::now() + WINDOW,
            }),
        }
    }

    pub fn set_limit(&self, requests_per_minute: u32) {
        self.state.lock().unwrap().requests_per_minute = requests_per_minute;
    }

    /// Increments the counter and returns whether the request may
    /// proceed immediately. A denied request should be deferred, not
    /// retried inline.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        if now > state.reset_time {
            state.count = 0;
            state.reset_time = now + WINDOW;
        }

        if state.count >= state.requests_per_minute {
            return false;
        }

        state.count += 1;
        true
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denies_once_the_limit_is_reached() {
        let limiter = RateLimiter::new();
        limiter.set_limit(2);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
