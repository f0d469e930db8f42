//! Throttling policy shared by every limiter backend.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, ThrottleError};

/// Default number of attempts before a caller is throttled.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default counting window (ban period) in seconds.
pub const DEFAULT_WINDOW_SECS: u64 = 600;
/// Default retention horizon for attempt records in seconds.
pub const DEFAULT_WATCH_PERIOD_SECS: u64 = 3600;

/// The (max attempts, window, watch period) tuple of a firewall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThrottlePolicy {
    /// Attempts allowed inside the window
    pub max_attempts: u32,
    /// Trailing window over which attempts are counted, in seconds
    pub window_secs: u64,
    /// How long records are retained before cleanup, in seconds
    pub watch_period_secs: u64,
}

impl ThrottlePolicy {
    /// Build a validated policy.
    pub fn new(max_attempts: u32, window_secs: u64, watch_period_secs: u64) -> Result<Self> {
        let policy = Self {
            max_attempts,
            window_secs,
            watch_period_secs,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Reject policies that could never throttle meaningfully.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts < 1 {
            return Err(ThrottleError::InvalidPolicy(format!(
                "max attempts must be at least 1, got {}",
                self.max_attempts
            )));
        }
        if self.window_secs < 1 {
            return Err(ThrottleError::InvalidPolicy(format!(
                "window must be at least 1 second, got {}",
                self.window_secs
            )));
        }
        if self.watch_period_secs < 1 {
            return Err(ThrottleError::InvalidPolicy(format!(
                "watch period must be at least 1 second, got {}",
                self.watch_period_secs
            )));
        }
        Ok(())
    }

    /// Canonical text form of the tuple, e.g. `db-3-600-3600`.
    pub fn tuple_key(&self) -> String {
        format!(
            "db-{}-{}-{}",
            self.max_attempts, self.window_secs, self.watch_period_secs
        )
    }

    /// Stable limiter identity derived from the tuple. Equal policies yield
    /// equal ids in every process.
    pub fn shared_limiter_id(&self) -> String {
        let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, self.tuple_key().as_bytes());
        format!("database.shared_{}", digest.simple())
    }
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            window_secs: DEFAULT_WINDOW_SECS,
            watch_period_secs: DEFAULT_WATCH_PERIOD_SECS,
        }
    }
}
