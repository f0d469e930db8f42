//! Throttling decisions and firewall configuration.

mod attempt;
mod backend;
mod cache;
mod counter;
mod database;
mod policy;
mod registry;
mod rules;

pub use attempt::{AttemptKey, LoginAttempt, TrackingType, DEFAULT_TRACKING_FIELDS, UNKNOWN_ADDRESS};
pub use backend::{Limiter, LimiterHandle, RateLimit, StorageKind};
pub use cache::CacheRateLimiter;
pub use counter::WindowCounter;
pub use database::DatabaseRateLimiter;
pub use policy::ThrottlePolicy;
pub use registry::{Firewall, FirewallRegistry};
pub use rules::{
    parse_interval, seconds_to_interval, FirewallConfig, FirewallSettings, ThrottleConfig, TimeUnit,
    DEFAULT_FIREWALL,
};
