//! Login Throttle - brute-force login protection engine
//!
//! This crate decides whether an authentication attempt may proceed and how
//! long a throttled caller has to wait. Attempts are kept in an append-only
//! store and counted over a trailing window; each named firewall carries its
//! own policy, and firewalls with the same policy share a counting domain.

pub mod clock;
pub mod config;
pub mod error;
pub mod info;
pub mod ratelimit;
pub mod store;
