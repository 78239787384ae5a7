//! Sliding-window throttle for invitation redemption.
//!
//! Two keyings: per source address (stops one address scanning many codes)
//! and per (join code, source address) pair (stops hammering one code).
//! Callers must surface a refusal exactly like an unknown code.

use std::time::{Duration, Instant};

use dashmap::DashMap;

pub struct RateLimiter {
    max_attempts: u32,
    window: Duration,
    buckets: DashMap<String, Vec<Instant>>,
}

impl RateLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            buckets: DashMap::new(),
        }
    }

    /// Record one attempt under `key`; false once the window is saturated.
    pub fn check_and_consume(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut attempts = self.buckets.entry(key.to_string()).or_default();
        attempts.retain(|t| now.duration_since(*t) < self.window);
        if attempts.len() >= self.max_attempts as usize {
            return false;
        }
        attempts.push(now);
        true
    }

    /// Gate for a redemption attempt from `addr` against `code`.
    pub fn allow_redemption(&self, addr: &str, code: &str) -> bool {
        if !self.check_and_consume(&format!("addr:{}", addr)) {
            return false;
        }
        self.check_and_consume(&format!("code:{}:{}", code, addr))
    }

    /// Drop buckets whose window has fully elapsed. Called by the
    /// registry reaper so the map does not grow with every address seen.
    pub fn prune(&self) {
        let now = Instant::now();
        self.buckets
            .retain(|_, attempts| attempts.iter().any(|t| now.duration_since(*t) < self.window));
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}
