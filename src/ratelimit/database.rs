//! Store-backed limiter.
//!
//! Every accepted attempt is appended to the [`AttemptStore`]; the verdict
//! is recomputed from the stored history on each call.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use super::attempt::AttemptKey;
use super::backend::{Limiter, RateLimit};
use super::policy::ThrottlePolicy;
use crate::clock::{add_secs, Clock};
use crate::error::Result;
use crate::store::AttemptStore;

/// A limiter that counts attempts in a durable store.
pub struct DatabaseRateLimiter {
    store: Arc<dyn AttemptStore>,
    clock: Arc<dyn Clock>,
    policy: ThrottlePolicy,
}

impl DatabaseRateLimiter {
    /// Create a limiter enforcing `policy` over `store`.
    pub fn new(store: Arc<dyn AttemptStore>, clock: Arc<dyn Clock>, policy: ThrottlePolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn AttemptStore> {
        &self.store
    }

    fn rejected(&self, retry_after: DateTime<Utc>) -> RateLimit {
        RateLimit {
            remaining_attempts: 0,
            retry_after,
            accepted: false,
            limit: self.policy.max_attempts,
        }
    }

    /// When the oldest attempt still inside the window falls out of it.
    async fn retry_after(&self, key: &AttemptKey) -> Result<DateTime<Utc>> {
        let attempts = self
            .store
            .list_recent(
                Some(&key.client_address),
                key.account(),
                self.policy.window_secs,
            )
            .await?;

        // Newest first, so the oldest is last
        Ok(match attempts.last() {
            Some(oldest) => add_secs(oldest.occurred_at, self.policy.window_secs),
            None => self.clock.now(),
        })
    }
}

#[async_trait]
impl Limiter for DatabaseRateLimiter {
    async fn consume(&self, key: &AttemptKey) -> Result<RateLimit> {
        let policy = &self.policy;

        trace!(
            key = %key,
            max_attempts = policy.max_attempts,
            window_secs = policy.window_secs,
            "Checking attempt against store"
        );

        // Blocked callers are not recorded again
        if self
            .store
            .is_blocked(
                &key.client_address,
                key.account(),
                policy.max_attempts,
                policy.window_secs,
            )
            .await?
        {
            let retry_after = self.retry_after(key).await?;
            warn!(key = %key, retry_after = %retry_after, "Blocked caller attempted again");
            return Ok(self.rejected(retry_after));
        }

        self.store
            .record(&key.client_address, key.account())
            .await?;

        let count = self
            .store
            .count_attempts(&key.client_address, key.account(), policy.window_secs)
            .await?;
        let max = u64::from(policy.max_attempts);

        if count >= max {
            let retry_after = self.retry_after(key).await?;
            debug!(
                key = %key,
                count = count,
                limit = policy.max_attempts,
                retry_after = %retry_after,
                "Attempt limit reached"
            );
            return Ok(self.rejected(retry_after));
        }

        Ok(RateLimit {
            remaining_attempts: (max - count) as u32,
            retry_after: self.clock.now(),
            accepted: true,
            limit: policy.max_attempts,
        })
    }

    async fn reset(&self, key: &AttemptKey) -> Result<()> {
        // History is kept for auditing and only expires through cleanup
        trace!(key = %key, "Reset requested, attempts retained");
        Ok(())
    }

    fn policy(&self) -> &ThrottlePolicy {
        &self.policy
    }
}
