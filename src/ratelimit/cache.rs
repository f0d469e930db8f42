//! Ephemeral in-process limiter.
//!
//! Counters live only as long as the process. Unlike the store-backed
//! limiter this one really forgets a caller on reset.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::attempt::AttemptKey;
use super::backend::{Limiter, RateLimit};
use super::counter::WindowCounter;
use super::policy::ThrottlePolicy;
use crate::clock::Clock;
use crate::error::Result;

/// A limiter keeping per-caller window counters in memory.
pub struct CacheRateLimiter {
    counters: DashMap<AttemptKey, WindowCounter>,
    clock: Arc<dyn Clock>,
    policy: ThrottlePolicy,
}

impl CacheRateLimiter {
    /// Create a limiter enforcing `policy`.
    pub fn new(clock: Arc<dyn Clock>, policy: ThrottlePolicy) -> Self {
        Self {
            counters: DashMap::new(),
            clock,
            policy,
        }
    }

    /// Attempts counted for `key` in its current window.
    pub fn current_count(&self, key: &AttemptKey) -> u32 {
        let now = self.clock.now();
        self.counters
            .get_mut(key)
            .map(|mut counter| counter.current_count(now))
            .unwrap_or(0)
    }

    /// Number of tracked callers.
    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }

    /// Drop counters whose window has closed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.counters.len();
        self.counters.retain(|_, counter| !counter.is_expired(now));
        before - self.counters.len()
    }
}

#[async_trait]
impl Limiter for CacheRateLimiter {
    async fn consume(&self, key: &AttemptKey) -> Result<RateLimit> {
        let now = self.clock.now();
        let limit = self.policy.max_attempts;

        trace!(key = %key, limit = limit, "Checking attempt against cache counter");

        let mut counter = self.counters.entry(key.clone()).or_insert_with(|| {
            debug!(
                key = %key,
                limit = limit,
                window_secs = self.policy.window_secs,
                "Creating attempt counter"
            );
            WindowCounter::new(now, self.policy.window_secs)
        });

        let accepted = counter.try_increment(now, limit);
        let remaining = counter.remaining(now, limit);
        let retry_after = if accepted { now } else { counter.window_end() };
        drop(counter);

        if !accepted {
            debug!(key = %key, retry_after = %retry_after, "Attempt limit exceeded");
        }

        Ok(RateLimit {
            remaining_attempts: remaining,
            retry_after,
            accepted,
            limit,
        })
    }

    async fn reset(&self, key: &AttemptKey) -> Result<()> {
        self.counters.remove(key);
        trace!(key = %key, "Attempt counter reset");
        Ok(())
    }

    fn policy(&self) -> &ThrottlePolicy {
        &self.policy
    }
}
