//! Firewall throttling rules.
//!
//! Two configuration shapes are accepted. The simple shape configures a
//! single firewall at the top level:
//!
//! ```yaml
//! max_count_attempts: 3
//! timeout: 600
//! firewall: main
//! storage: database
//! ```
//!
//! The multi shape configures any number of named firewalls, each on its
//! own terms:
//!
//! ```yaml
//! firewalls:
//!   main:
//!     max_count_attempts: 3
//!     timeout: 600
//!     storage: database
//!   api:
//!     max_count_attempts: 5
//!     interval: 5 minutes
//! ```
//!
//! A non-empty `firewalls` map always wins over the top-level keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::attempt::DEFAULT_TRACKING_FIELDS;
use super::backend::StorageKind;
use super::policy::{
    ThrottlePolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_WATCH_PERIOD_SECS, DEFAULT_WINDOW_SECS,
};
use crate::error::{Result, ThrottleError};

/// Firewall used by the simple configuration shape when none is named.
pub const DEFAULT_FIREWALL: &str = "main";

/// Throttle configuration in either supported shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Whether the simple-shape firewall is throttled at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_count_attempts: u32,
    /// Window (ban period) in seconds
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Window as a human interval such as "10 minutes"; used when `timeout` is unset
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default = "default_watch_period")]
    pub watch_period: u64,
    /// Name of the simple-shape firewall
    #[serde(default = "default_firewall")]
    pub firewall: String,
    #[serde(default)]
    pub storage: StorageKind,
    /// Explicit limiter id; firewalls naming the same id share one limiter
    #[serde(default)]
    pub rate_limiter: Option<String>,
    #[serde(default = "default_tracking_fields")]
    pub tracking_fields: Vec<String>,
    /// Named firewalls (multi shape)
    #[serde(default)]
    pub firewalls: BTreeMap<String, FirewallSettings>,
}

/// Settings of one named firewall in the multi shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_count_attempts: u32,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default = "default_watch_period")]
    pub watch_period: u64,
    #[serde(default)]
    pub storage: StorageKind,
    #[serde(default)]
    pub rate_limiter: Option<String>,
    #[serde(default = "default_tracking_fields")]
    pub tracking_fields: Vec<String>,
}

/// A resolved, validated firewall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallConfig {
    pub name: String,
    pub enabled: bool,
    pub policy: ThrottlePolicy,
    pub storage: StorageKind,
    /// Explicitly assigned limiter id, if any
    pub limiter_id: Option<String>,
    /// Form fields probed for the account identifier, in order
    pub tracking_fields: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_watch_period() -> u64 {
    DEFAULT_WATCH_PERIOD_SECS
}

fn default_firewall() -> String {
    DEFAULT_FIREWALL.to_string()
}

fn default_tracking_fields() -> Vec<String> {
    DEFAULT_TRACKING_FIELDS.iter().map(|f| f.to_string()).collect()
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_count_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout: None,
            interval: None,
            watch_period: DEFAULT_WATCH_PERIOD_SECS,
            firewall: default_firewall(),
            storage: StorageKind::default(),
            rate_limiter: None,
            tracking_fields: default_tracking_fields(),
            firewalls: BTreeMap::new(),
        }
    }
}

impl Default for FirewallSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_count_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout: None,
            interval: None,
            watch_period: DEFAULT_WATCH_PERIOD_SECS,
            storage: StorageKind::default(),
            rate_limiter: None,
            tracking_fields: default_tracking_fields(),
        }
    }
}

impl ThrottleConfig {
    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ThrottleError::Config(format!("Failed to parse throttle config: {}", e)))
    }

    /// Whether the multi-firewall shape is in use.
    pub fn is_multi(&self) -> bool {
        !self.firewalls.is_empty()
    }

    /// Resolve and validate every configured firewall, disabled ones included.
    pub fn firewall_configs(&self) -> Result<Vec<FirewallConfig>> {
        if self.is_multi() {
            return self
                .firewalls
                .iter()
                .map(|(name, settings)| settings.resolve(name))
                .collect();
        }

        let single = FirewallSettings {
            enabled: self.enabled,
            max_count_attempts: self.max_count_attempts,
            timeout: self.timeout,
            interval: self.interval.clone(),
            watch_period: self.watch_period,
            storage: self.storage,
            rate_limiter: self.rate_limiter.clone(),
            tracking_fields: self.tracking_fields.clone(),
        };
        Ok(vec![single.resolve(&self.firewall)?])
    }
}

impl FirewallSettings {
    /// Window in seconds: `timeout` if set, else the parsed `interval`.
    pub fn window_secs(&self) -> u64 {
        if let Some(timeout) = self.timeout {
            return timeout;
        }
        match self.interval.as_deref() {
            Some(interval) => parse_interval(interval).unwrap_or_else(|| {
                warn!(
                    interval = %interval,
                    fallback_secs = DEFAULT_WINDOW_SECS,
                    "Unrecognised interval, using default window"
                );
                DEFAULT_WINDOW_SECS
            }),
            None => DEFAULT_WINDOW_SECS,
        }
    }

    /// Validate these settings as the firewall `name`.
    pub fn resolve(&self, name: &str) -> Result<FirewallConfig> {
        if name.trim().is_empty() {
            return Err(ThrottleError::Config(
                "firewall name must not be empty".to_string(),
            ));
        }

        let policy = ThrottlePolicy::new(self.max_count_attempts, self.window_secs(), self.watch_period)
            .map_err(|e| match e {
                ThrottleError::InvalidPolicy(msg) => {
                    ThrottleError::InvalidPolicy(format!("firewall '{}': {}", name, msg))
                }
                other => other,
            })?;

        Ok(FirewallConfig {
            name: name.to_string(),
            enabled: self.enabled,
            policy,
            storage: self.storage,
            limiter_id: self.rate_limiter.clone().filter(|id| !id.is_empty()),
            tracking_fields: self.tracking_fields.clone(),
        })
    }
}

/// Time unit of a human interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    /// 30 days
    Month,
    /// 365 days
    Year,
}

impl TimeUnit {
    /// Length of one unit in seconds.
    pub fn secs(&self) -> u64 {
        match self {
            TimeUnit::Second => 1,
            TimeUnit::Minute => 60,
            TimeUnit::Hour => 3_600,
            TimeUnit::Day => 86_400,
            TimeUnit::Week => 604_800,
            TimeUnit::Month => 2_592_000,
            TimeUnit::Year => 31_536_000,
        }
    }

    /// Parse a singular or plural unit name, case-insensitively.
    pub fn parse(unit: &str) -> Option<Self> {
        let unit = unit.to_ascii_lowercase();
        let singular = unit.strip_suffix('s').unwrap_or(&unit);
        match singular {
            "second" => Some(TimeUnit::Second),
            "minute" => Some(TimeUnit::Minute),
            "hour" => Some(TimeUnit::Hour),
            "day" => Some(TimeUnit::Day),
            "week" => Some(TimeUnit::Week),
            "month" => Some(TimeUnit::Month),
            "year" => Some(TimeUnit::Year),
            _ => None,
        }
    }
}

/// Parse an interval such as "10 minutes" or "1 hour" into seconds.
pub fn parse_interval(interval: &str) -> Option<u64> {
    let mut parts = interval.split_whitespace();
    let amount: u64 = parts.next()?.parse().ok()?;
    let unit = TimeUnit::parse(parts.next()?)?;
    if parts.next().is_some() {
        return None;
    }
    amount.checked_mul(unit.secs())
}

/// Render a window as a human interval ("45 seconds", "10 minutes", "2 hours").
pub fn seconds_to_interval(secs: u64) -> String {
    if secs < 60 {
        return format!("{} seconds", secs);
    }

    if secs < 3_600 {
        let minutes = (secs + 30) / 60;
        return format!("{} minute{}", minutes, if minutes > 1 { "s" } else { "" });
    }

    let hours = (secs + 1_800) / 3_600;
    format!("{} hour{}", hours, if hours > 1 { "s" } else { "" })
}
