//! Inbound attempts and the subject they are throttled under.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Address used when the transport cannot tell who is calling.
pub const UNKNOWN_ADDRESS: &str = "unknown";

/// Form fields probed for an account identifier, in priority order.
pub const DEFAULT_TRACKING_FIELDS: [&str; 3] = ["_username", "username", "email"];

/// A raw authentication attempt as handed over by the login pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginAttempt {
    /// Client address, if the transport supplied one
    pub client_address: Option<String>,
    /// Submitted form fields
    pub fields: HashMap<String, String>,
}

impl LoginAttempt {
    /// Create an attempt with no address and no fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the client address.
    pub fn from_address(mut self, client_address: impl Into<String>) -> Self {
        self.client_address = Some(client_address.into());
        self
    }

    /// Add a submitted form field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// The client address, or [`UNKNOWN_ADDRESS`] when missing or blank.
    pub fn client_address(&self) -> &str {
        self.client_address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(UNKNOWN_ADDRESS)
    }

    /// First non-empty value among `candidates`.
    pub fn account_identifier<S: AsRef<str>>(&self, candidates: &[S]) -> Option<&str> {
        candidates
            .iter()
            .filter_map(|name| self.fields.get(name.as_ref()))
            .map(String::as_str)
            .find(|value| !value.is_empty())
    }
}

/// Whether counting keys on the account identifier or on the address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackingType {
    #[serde(rename = "by address")]
    ByAddress,
    #[serde(rename = "by account")]
    ByAccount,
}

impl TrackingType {
    /// Tracking mode implied by an optional identifier.
    pub fn for_identifier(account_identifier: Option<&str>) -> Self {
        match account_identifier {
            Some(account) if !account.is_empty() => TrackingType::ByAccount,
            _ => TrackingType::ByAddress,
        }
    }
}

impl fmt::Display for TrackingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingType::ByAddress => write!(f, "by address"),
            TrackingType::ByAccount => write!(f, "by account"),
        }
    }
}

/// The (address, identifier) pair a limiter counts against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttemptKey {
    pub client_address: String,
    pub account_identifier: Option<String>,
}

impl AttemptKey {
    /// Create a key directly. The address is trimmed and a blank one becomes
    /// [`UNKNOWN_ADDRESS`]. A blank identifier is dropped.
    pub fn new(client_address: &str, account_identifier: Option<&str>) -> Self {
        let client_address = match client_address.trim() {
            "" => UNKNOWN_ADDRESS,
            trimmed => trimmed,
        };
        Self {
            client_address: client_address.to_string(),
            account_identifier: account_identifier
                .filter(|a| !a.is_empty())
                .map(str::to_string),
        }
    }

    /// Extract the key from an attempt, probing `tracking_fields` in order.
    pub fn extract<S: AsRef<str>>(attempt: &LoginAttempt, tracking_fields: &[S]) -> Self {
        Self::new(
            attempt.client_address(),
            attempt.account_identifier(tracking_fields),
        )
    }

    /// The identifier as a borrowed option.
    pub fn account(&self) -> Option<&str> {
        self.account_identifier.as_deref()
    }

    /// How this key is tracked.
    pub fn tracking_type(&self) -> TrackingType {
        TrackingType::for_identifier(self.account())
    }
}

impl fmt::Display for AttemptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.account_identifier {
            Some(account) => write!(f, "{}|{}", self.client_address, account),
            None => write!(f, "{}", self.client_address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_address_falls_back_to_unknown() {
        assert_eq!(LoginAttempt::new().client_address(), UNKNOWN_ADDRESS);
        assert_eq!(LoginAttempt::new().from_address("").client_address(), UNKNOWN_ADDRESS);
        assert_eq!(
            LoginAttempt::new().from_address("   ").client_address(),
            UNKNOWN_ADDRESS
        );
        assert_eq!(
            LoginAttempt::new().from_address("10.0.0.1").client_address(),
            "10.0.0.1"
        );
    }

    #[test]
    fn test_identifier_follows_candidate_order() {
        let attempt = LoginAttempt::new()
            .with_field("email", "alice@example.com")
            .with_field("_username", "alice");

        assert_eq!(
            attempt.account_identifier(&DEFAULT_TRACKING_FIELDS),
            Some("alice")
        );
        assert_eq!(
            attempt.account_identifier(&["email", "_username"]),
            Some("alice@example.com")
        );
    }

    #[test]
    fn test_empty_candidate_is_skipped() {
        let attempt = LoginAttempt::new()
            .with_field("_username", "")
            .with_field("email", "alice@example.com");

        assert_eq!(
            attempt.account_identifier(&DEFAULT_TRACKING_FIELDS),
            Some("alice@example.com")
        );
    }

    #[test]
    fn test_no_candidate_means_no_identifier() {
        let attempt = LoginAttempt::new().with_field("password", "hunter2");
        assert_eq!(attempt.account_identifier(&DEFAULT_TRACKING_FIELDS), None);
    }

    #[test]
    fn test_key_extraction() {
        let attempt = LoginAttempt::new()
            .from_address("10.0.0.1")
            .with_field("username", "alice");

        let key = AttemptKey::extract(&attempt, &DEFAULT_TRACKING_FIELDS);
        assert_eq!(key.client_address, "10.0.0.1");
        assert_eq!(key.account(), Some("alice"));
        assert_eq!(key.tracking_type(), TrackingType::ByAccount);
        assert_eq!(key.to_string(), "10.0.0.1|alice");
    }

    #[test]
    fn test_key_drops_blank_identifier() {
        let key = AttemptKey::new("10.0.0.1", Some(""));
        assert_eq!(key.account(), None);
        assert_eq!(key.tracking_type(), TrackingType::ByAddress);
        assert_eq!(key.to_string(), "10.0.0.1");
    }

    #[test]
    fn test_key_normalises_whitespace_address() {
        assert_eq!(AttemptKey::new("   ", None).client_address, UNKNOWN_ADDRESS);
        assert_eq!(AttemptKey::new(" 10.0.0.1 ", None).client_address, "10.0.0.1");
    }

    #[test]
    fn test_tracking_type_display() {
        assert_eq!(TrackingType::ByAddress.to_string(), "by address");
        assert_eq!(TrackingType::ByAccount.to_string(), "by account");
    }

    #[test]
    fn test_tracking_type_serializes_like_display() {
        for tracking in [TrackingType::ByAddress, TrackingType::ByAccount] {
            let json = serde_json::to_string(&tracking).unwrap();
            assert_eq!(json, format!("\"{}\"", tracking));
            assert_eq!(serde_json::from_str::<TrackingType>(&json).unwrap(), tracking);
        }
    }
}
