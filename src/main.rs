use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use login_throttle::clock::{Clock, SystemClock};
use login_throttle::config::{LoggingConfig, Settings};
use login_throttle::info::ThrottleInfoResolver;
use login_throttle::ratelimit::{seconds_to_interval, FirewallRegistry, LoginAttempt};
use login_throttle::store::FileAttemptStore;

/// Brute-force login protection engine.
#[derive(Debug, Parser)]
#[command(name = "login-throttle", version, about)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, default_value = "login_throttle.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Count a login attempt and print the verdict
    Consume {
        #[arg(short, long)]
        firewall: String,
        /// Client address; "unknown" when omitted
        #[arg(long)]
        ip: Option<String>,
        /// Submitted form field, as name=value
        #[arg(long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },
    /// Show throttle status without counting an attempt
    Info {
        #[arg(short, long)]
        firewall: String,
        #[arg(long)]
        ip: Option<String>,
        /// Account identifier, overriding the form fields
        #[arg(long)]
        account: Option<String>,
        #[arg(long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },
    /// Remove attempts older than the longest watch period
    Cleanup,
    /// List configured firewalls
    Firewalls,
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))
}

fn login_attempt(ip: Option<String>, fields: Vec<(String, String)>) -> LoginAttempt {
    let mut attempt = LoginAttempt::new();
    attempt.client_address = ip;
    attempt.fields = fields.into_iter().collect();
    attempt
}

#[derive(Serialize)]
struct FirewallSummary<'a> {
    name: &'a str,
    storage: String,
    max_attempts: u32,
    window: String,
    watch_period_secs: u64,
    limiter_id: &'a str,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(Some(&cli.config))
        .with_context(|| format!("loading {}", cli.config.display()))?;
    init_tracing(&settings.logging);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting login throttle");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(
        FileAttemptStore::open_with_clock(&settings.store.path, clock.clone())
            .await
            .with_context(|| format!("opening {}", settings.store.path.display()))?,
    );
    let registry = Arc::new(FirewallRegistry::from_config(
        &settings.login_throttle,
        store,
        clock,
    )?);

    match cli.command {
        Command::Consume { firewall, ip, fields } => {
            let attempt = login_attempt(ip, fields);
            let verdict = registry.consume(&firewall, &attempt).await?;
            println!("{}", serde_json::to_string_pretty(&verdict)?);
        }
        Command::Info {
            firewall,
            ip,
            account,
            fields,
        } => {
            let attempt = login_attempt(ip, fields);
            let resolver = ThrottleInfoResolver::new(registry.clone());
            let info = resolver
                .attempt_info_for(&firewall, &attempt, account.as_deref())
                .await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Cleanup => {
            let removed = registry.cleanup().await?;
            println!("{}", removed);
        }
        Command::Firewalls => {
            let firewalls = registry.firewalls();
            let summaries: Vec<FirewallSummary<'_>> = firewalls
                .iter()
                .map(|f| FirewallSummary {
                    name: f.name(),
                    storage: f.storage().to_string(),
                    max_attempts: f.policy().max_attempts,
                    window: seconds_to_interval(f.policy().window_secs),
                    watch_period_secs: f.policy().watch_period_secs,
                    limiter_id: f.limiter_id(),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
    }

    Ok(())
}
