//! Firewall registry.
//!
//! Built once from configuration. Maps each enabled firewall to its policy
//! and to the limiter that enforces it. Firewalls whose limiter identity
//! matches share one limiter instance, and therefore one counting domain.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info};

use super::attempt::{AttemptKey, LoginAttempt};
use super::backend::{Limiter, LimiterHandle, RateLimit, StorageKind};
use super::cache::CacheRateLimiter;
use super::database::DatabaseRateLimiter;
use super::policy::ThrottlePolicy;
use super::rules::{FirewallConfig, ThrottleConfig};
use crate::clock::Clock;
use crate::error::{Result, ThrottleError};
use crate::store::AttemptStore;

/// An enabled firewall together with its limiter.
#[derive(Debug, Clone)]
pub struct Firewall {
    config: FirewallConfig,
    limiter_id: String,
    limiter: LimiterHandle,
}

impl Firewall {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &FirewallConfig {
        &self.config
    }

    pub fn policy(&self) -> &ThrottlePolicy {
        &self.config.policy
    }

    pub fn storage(&self) -> StorageKind {
        self.config.storage
    }

    /// Identity of the counting domain this firewall belongs to.
    pub fn limiter_id(&self) -> &str {
        &self.limiter_id
    }

    pub fn limiter(&self) -> &LimiterHandle {
        &self.limiter
    }

    /// The subject an attempt is counted under in this firewall.
    pub fn attempt_key(&self, attempt: &LoginAttempt) -> AttemptKey {
        AttemptKey::extract(attempt, &self.config.tracking_fields)
    }

    /// Count an attempt against this firewall's limiter.
    pub async fn consume(&self, attempt: &LoginAttempt) -> Result<RateLimit> {
        let key = self.attempt_key(attempt);
        debug!(firewall = %self.name(), key = %key, "Consuming attempt");
        self.limiter.consume(&key).await
    }

    /// Reset the caller after a successful login.
    pub async fn reset(&self, attempt: &LoginAttempt) -> Result<()> {
        let key = self.attempt_key(attempt);
        self.limiter.reset(&key).await
    }
}

/// Limiter identity for a firewall.
fn limiter_identity(config: &FirewallConfig) -> String {
    match (&config.limiter_id, config.storage) {
        (Some(explicit), _) => explicit.clone(),
        (None, StorageKind::Database) => config.policy.shared_limiter_id(),
        (None, StorageKind::Cache) => format!("cache.{}", config.name),
    }
}

/// Registry of the enabled firewalls.
pub struct FirewallRegistry {
    firewalls: HashMap<String, Arc<Firewall>>,
    limiters: HashMap<String, LimiterHandle>,
    store: Arc<dyn AttemptStore>,
}

impl FirewallRegistry {
    /// Build the registry from throttle configuration.
    ///
    /// Fails with `InvalidPolicy` or `Config` before any attempt is handled.
    pub fn from_config(
        config: &ThrottleConfig,
        store: Arc<dyn AttemptStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Self::from_firewalls(config.firewall_configs()?, store, clock)
    }

    /// Build the registry from already-resolved firewalls.
    pub fn from_firewalls(
        configs: Vec<FirewallConfig>,
        store: Arc<dyn AttemptStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut firewalls = HashMap::new();
        let mut limiters: HashMap<String, LimiterHandle> = HashMap::new();

        for config in configs {
            if !config.enabled {
                debug!(firewall = %config.name, "Firewall disabled, skipping");
                continue;
            }

            let limiter_id = limiter_identity(&config);
            let limiter = match limiters.get(&limiter_id) {
                Some(existing) => {
                    if existing.kind() != config.storage || existing.policy() != &config.policy {
                        return Err(ThrottleError::Config(format!(
                            "firewall '{}' shares limiter '{}' but configures a different storage or policy",
                            config.name, limiter_id
                        )));
                    }
                    existing.clone()
                }
                None => {
                    let handle = match config.storage {
                        StorageKind::Database => LimiterHandle::Database(Arc::new(
                            DatabaseRateLimiter::new(store.clone(), clock.clone(), config.policy),
                        )),
                        StorageKind::Cache => LimiterHandle::Cache(Arc::new(
                            CacheRateLimiter::new(clock.clone(), config.policy),
                        )),
                    };
                    debug!(
                        limiter_id = %limiter_id,
                        storage = %config.storage,
                        max_attempts = config.policy.max_attempts,
                        window_secs = config.policy.window_secs,
                        "Created limiter"
                    );
                    limiters.insert(limiter_id.clone(), handle.clone());
                    handle
                }
            };

            if firewalls.contains_key(&config.name) {
                return Err(ThrottleError::Config(format!(
                    "firewall '{}' is configured twice",
                    config.name
                )));
            }
            firewalls.insert(
                config.name.clone(),
                Arc::new(Firewall {
                    config,
                    limiter_id,
                    limiter,
                }),
            );
        }

        info!(
            firewalls = firewalls.len(),
            limiters = limiters.len(),
            "Firewall registry built"
        );

        Ok(Self {
            firewalls,
            limiters,
            store,
        })
    }

    /// Look up an enabled firewall by name.
    pub fn resolve(&self, firewall: &str) -> Option<Arc<Firewall>> {
        self.firewalls.get(firewall).cloned()
    }

    /// All enabled firewalls, sorted by name.
    pub fn firewalls(&self) -> Vec<Arc<Firewall>> {
        let mut firewalls: Vec<Arc<Firewall>> = self.firewalls.values().cloned().collect();
        firewalls.sort_by(|a, b| a.name().cmp(b.name()));
        firewalls
    }

    /// Number of distinct limiters (counting domains).
    pub fn limiter_count(&self) -> usize {
        self.limiters.len()
    }

    /// Look up a limiter by identity.
    pub fn limiter(&self, limiter_id: &str) -> Option<&LimiterHandle> {
        self.limiters.get(limiter_id)
    }

    /// The store shared by all durable firewalls.
    pub fn store(&self) -> &Arc<dyn AttemptStore> {
        &self.store
    }

    /// Consume an attempt in the named firewall.
    pub async fn consume(&self, firewall: &str, attempt: &LoginAttempt) -> Result<RateLimit> {
        let firewall = self
            .resolve(firewall)
            .ok_or_else(|| ThrottleError::FirewallNotFound(firewall.to_string()))?;
        firewall.consume(attempt).await
    }

    /// Reset the caller in the named firewall.
    pub async fn reset(&self, firewall: &str, attempt: &LoginAttempt) -> Result<()> {
        let firewall = self
            .resolve(firewall)
            .ok_or_else(|| ThrottleError::FirewallNotFound(firewall.to_string()))?;
        firewall.reset(attempt).await
    }

    /// Longest watch period among durable firewalls.
    pub fn retention_secs(&self) -> Option<u64> {
        self.firewalls
            .values()
            .filter(|f| f.storage() == StorageKind::Database)
            .map(|f| f.policy().watch_period_secs)
            .max()
    }

    /// Purge attempt records no durable firewall still watches, and expired
    /// in-process counters. Returns the number of store records removed.
    pub async fn cleanup(&self) -> Result<u64> {
        let purged_counters: usize = self
            .limiters
            .values()
            .filter_map(|handle| match handle {
                LimiterHandle::Cache(limiter) => Some(limiter.purge_expired()),
                LimiterHandle::Database(_) => None,
            })
            .sum();

        let removed = match self.retention_secs() {
            Some(watch_period_secs) => self.store.cleanup(watch_period_secs).await?,
            None => 0,
        };

        info!(
            removed = removed,
            purged_counters = purged_counters,
            "Retention cleanup finished"
        );
        Ok(removed)
    }

    /// Reset a caller in every firewall, e.g. after a password change.
    pub async fn reset_everywhere(&self, attempt: &LoginAttempt) -> Result<()> {
        try_join_all(self.firewalls.values().map(|f| f.reset(attempt))).await?;
        Ok(())
    }
}
