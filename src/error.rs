//! Error types for the login throttle engine.

use thiserror::Error;

/// Main error type for login throttle operations.
#[derive(Error, Debug)]
pub enum ThrottleError {
    /// The attempt store could not be read or written
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A firewall policy was rejected while loading configuration
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// No enabled firewall is registered under the requested name
    #[error("Firewall not configured: {0}")]
    FirewallNotFound(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ThrottleError {
    /// Wrap any storage failure, keeping only its message.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        ThrottleError::StorageUnavailable(err.to_string())
    }
}

impl From<config::ConfigError> for ThrottleError {
    fn from(err: config::ConfigError) -> Self {
        ThrottleError::Config(err.to_string())
    }
}

/// Result type alias for login throttle operations.
pub type Result<T> = std::result::Result<T, ThrottleError>;
