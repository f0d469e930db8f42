//! Limiter capability shared by the durable and ephemeral backends.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::attempt::AttemptKey;
use super::cache::CacheRateLimiter;
use super::database::DatabaseRateLimiter;
use super::policy::ThrottlePolicy;
use crate::error::Result;

/// Verdict returned for every consumed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Attempts left before the caller is throttled
    pub remaining_attempts: u32,
    /// Earliest instant at which a retry may succeed; `now` when accepted
    pub retry_after: DateTime<Utc>,
    pub accepted: bool,
    /// Configured maximum attempts
    pub limit: u32,
}

impl RateLimit {
    /// Time the caller must wait, measured from `now`.
    pub fn wait_duration(&self, now: DateTime<Utc>) -> Duration {
        (self.retry_after - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Trait for limiter implementations.
///
/// Both the store-backed and the in-process limiter implement this so the
/// registry can hand either to the login pipeline.
#[async_trait]
pub trait Limiter: Send + Sync {
    /// Count one attempt for `key` and decide whether it may proceed.
    async fn consume(&self, key: &AttemptKey) -> Result<RateLimit>;

    /// Forget the caller's history after a successful login, where the
    /// backend supports it.
    async fn reset(&self, key: &AttemptKey) -> Result<()>;

    /// The policy this limiter enforces.
    fn policy(&self) -> &ThrottlePolicy;
}

/// Where a firewall keeps its attempt history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Ephemeral in-process counters
    #[default]
    Cache,
    /// The durable attempt store
    Database,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::Cache => write!(f, "cache"),
            StorageKind::Database => write!(f, "database"),
        }
    }
}

/// A concrete limiter, tagged by backend.
#[derive(Clone)]
pub enum LimiterHandle {
    Database(Arc<DatabaseRateLimiter>),
    Cache(Arc<CacheRateLimiter>),
}

impl LimiterHandle {
    /// Which backend this handle wraps.
    pub fn kind(&self) -> StorageKind {
        match self {
            LimiterHandle::Database(_) => StorageKind::Database,
            LimiterHandle::Cache(_) => StorageKind::Cache,
        }
    }

    /// Whether two handles point at the same limiter instance.
    pub fn same_limiter(&self, other: &LimiterHandle) -> bool {
        match (self, other) {
            (LimiterHandle::Database(a), LimiterHandle::Database(b)) => Arc::ptr_eq(a, b),
            (LimiterHandle::Cache(a), LimiterHandle::Cache(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn as_limiter(&self) -> &dyn Limiter {
        match self {
            LimiterHandle::Database(limiter) => limiter.as_ref(),
            LimiterHandle::Cache(limiter) => limiter.as_ref(),
        }
    }
}

impl fmt::Debug for LimiterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimiterHandle")
            .field("kind", &self.kind())
            .field("policy", self.policy())
            .finish()
    }
}

#[async_trait]
impl Limiter for LimiterHandle {
    async fn consume(&self, key: &AttemptKey) -> Result<RateLimit> {
        self.as_limiter().consume(key).await
    }

    async fn reset(&self, key: &AttemptKey) -> Result<()> {
        self.as_limiter().reset(key).await
    }

    fn policy(&self) -> &ThrottlePolicy {
        self.as_limiter().policy()
    }
}
