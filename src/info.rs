//! Read-only throttle status for user-facing messages.
//!
//! The resolver answers "how many attempts are left and when may I retry"
//! without ever recording an attempt, so it is safe to call on every
//! rendering of a failed login.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::clock::add_secs;
use crate::error::Result;
use crate::ratelimit::{
    DatabaseRateLimiter, Firewall, FirewallRegistry, LimiterHandle, LoginAttempt, TrackingType,
};

/// Throttle status of a caller in one firewall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptInfo {
    pub current_attempts: u64,
    pub max_attempts: u32,
    pub remaining_attempts: u32,
    pub is_blocked: bool,
    /// Set only while blocked and a history exists
    pub retry_after: Option<DateTime<Utc>>,
    pub tracking_type: TrackingType,
}

impl AttemptInfo {
    /// Result for a firewall that is not configured.
    pub fn neutral() -> Self {
        Self {
            current_attempts: 0,
            max_attempts: 0,
            remaining_attempts: 0,
            is_blocked: false,
            retry_after: None,
            tracking_type: TrackingType::ByAddress,
        }
    }
}

/// Previews throttle status without consuming attempts.
pub struct ThrottleInfoResolver {
    registry: Arc<FirewallRegistry>,
}

impl ThrottleInfoResolver {
    pub fn new(registry: Arc<FirewallRegistry>) -> Self {
        Self { registry }
    }

    /// Status of `client_address` / `account_identifier` in `firewall`.
    ///
    /// Unknown firewalls yield [`AttemptInfo::neutral`]. Storage errors are
    /// propagated.
    pub async fn get_attempt_info(
        &self,
        firewall: &str,
        client_address: &str,
        account_identifier: Option<&str>,
    ) -> Result<AttemptInfo> {
        let Some(firewall) = self.registry.resolve(firewall) else {
            trace!(firewall = %firewall, "No throttle configuration, returning neutral info");
            return Ok(AttemptInfo::neutral());
        };

        let account_identifier = account_identifier.filter(|a| !a.is_empty());
        let tracking_type = TrackingType::for_identifier(account_identifier);

        match firewall.limiter() {
            LimiterHandle::Database(limiter) => {
                database_info(&firewall, limiter, client_address, account_identifier).await
            }
            // Ephemeral counters cannot be inspected without consuming
            LimiterHandle::Cache(_) => Ok(AttemptInfo {
                current_attempts: 0,
                max_attempts: firewall.policy().max_attempts,
                remaining_attempts: 0,
                is_blocked: false,
                retry_after: None,
                tracking_type,
            }),
        }
    }

    /// Status for a raw attempt. `account_override` wins when non-empty;
    /// otherwise the firewall's tracking fields are probed.
    pub async fn attempt_info_for(
        &self,
        firewall: &str,
        attempt: &LoginAttempt,
        account_override: Option<&str>,
    ) -> Result<AttemptInfo> {
        let Some(resolved) = self.registry.resolve(firewall) else {
            return Ok(AttemptInfo::neutral());
        };

        let key = resolved.attempt_key(attempt);
        let account = account_override
            .filter(|a| !a.is_empty())
            .or_else(|| key.account());
        self.get_attempt_info(firewall, &key.client_address, account)
            .await
    }
}

async fn database_info(
    firewall: &Firewall,
    limiter: &DatabaseRateLimiter,
    client_address: &str,
    account_identifier: Option<&str>,
) -> Result<AttemptInfo> {
    let store = limiter.store();
    let policy = firewall.policy();
    let window = policy.window_secs;

    // Each mode deliberately ignores the other dimension
    let (tracking_type, current_attempts) = match account_identifier {
        Some(account) => (
            TrackingType::ByAccount,
            store.count_by_account(account, window).await?,
        ),
        None => (
            TrackingType::ByAddress,
            store.count_by_address(client_address, window).await?,
        ),
    };

    let is_blocked = current_attempts >= u64::from(policy.max_attempts);
    let remaining_attempts = policy
        .max_attempts
        .saturating_sub(u32::try_from(current_attempts).unwrap_or(u32::MAX));

    let retry_after = if is_blocked {
        let attempts = match account_identifier {
            Some(account) => store.list_recent(None, Some(account), window).await?,
            None => store.list_recent(Some(client_address), None, window).await?,
        };
        attempts
            .last()
            .map(|oldest| add_secs(oldest.occurred_at, window))
    } else {
        None
    };

    trace!(
        firewall = %firewall.name(),
        tracking = %tracking_type,
        current_attempts = current_attempts,
        is_blocked = is_blocked,
        "Resolved attempt info"
    );

    Ok(AttemptInfo {
        current_attempts,
        max_attempts: policy.max_attempts,
        remaining_attempts,
        is_blocked,
        retry_after,
        tracking_type,
    })
}
