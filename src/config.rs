//! Configuration management for the login throttle.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, ThrottleError};
use crate::ratelimit::{StorageKind, ThrottleConfig};

/// Prefix of environment overrides, e.g. `LOGIN_THROTTLE__LOGGING__LEVEL=debug`.
pub const ENV_PREFIX: &str = "LOGIN_THROTTLE";

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Firewall throttling rules
    #[serde(default)]
    pub login_throttle: ThrottleConfig,

    /// Attempt store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Attempt store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the JSON-lines attempt log
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("var/login_attempts.jsonl")
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Load settings from an optional YAML file, then apply environment
    /// overrides. A missing file is not an error.
    ///
    /// The file is parsed with `serde_yaml` so firewall names keep their
    /// case. Environment overrides only reach scalar keys; the `firewalls`
    /// map can only be set from the file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => match Self::from_file(path) {
                Ok(settings) => settings,
                Err(ThrottleError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    info!(path = %path.display(), "Configuration file not found, using defaults");
                    Self::default()
                }
                Err(e) => return Err(e),
            },
            None => Self::default(),
        };

        let overrides: EnvOverrides = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        overrides.apply(&mut settings);

        Ok(settings)
    }

    /// Load settings from a YAML file without environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse settings from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| ThrottleError::Config(e.to_string()))
    }
}

/// Scalar settings that may be overridden from the environment.
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    #[serde(default)]
    login_throttle: ThrottleOverrides,
    #[serde(default)]
    store: StoreOverrides,
    #[serde(default)]
    logging: LoggingOverrides,
}

#[derive(Debug, Default, Deserialize)]
struct ThrottleOverrides {
    enabled: Option<bool>,
    max_count_attempts: Option<u32>,
    timeout: Option<u64>,
    interval: Option<String>,
    watch_period: Option<u64>,
    firewall: Option<String>,
    storage: Option<StorageKind>,
    rate_limiter: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StoreOverrides {
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingOverrides {
    level: Option<String>,
    json: Option<bool>,
}

impl EnvOverrides {
    fn apply(self, settings: &mut Settings) {
        let throttle = &mut settings.login_throttle;
        let env = self.login_throttle;
        if let Some(enabled) = env.enabled {
            throttle.enabled = enabled;
        }
        if let Some(max) = env.max_count_attempts {
            throttle.max_count_attempts = max;
        }
        if env.timeout.is_some() {
            throttle.timeout = env.timeout;
        }
        if env.interval.is_some() {
            throttle.interval = env.interval;
        }
        if let Some(watch_period) = env.watch_period {
            throttle.watch_period = watch_period;
        }
        if let Some(firewall) = env.firewall {
            throttle.firewall = firewall;
        }
        if let Some(storage) = env.storage {
            throttle.storage = storage;
        }
        if env.rate_limiter.is_some() {
            throttle.rate_limiter = env.rate_limiter;
        }

        if let Some(path) = self.store.path {
            settings.store.path = path;
        }
        if let Some(level) = self.logging.level {
            settings.logging.level = level;
        }
        if let Some(json) = self.logging.json {
            settings.logging.json = json;
        }
    }
}
