use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use gatekeeper::config::{GatekeeperConfig, LogFormat};
use gatekeeper::ratelimit::rules::GENERAL;
use gatekeeper::{RateLimitConfig, RateLimiter};

/// Inspect and administer rate limits.
///
/// State is shared only through the remote store; without one, each
/// invocation starts from an empty local store.
#[derive(Parser, Debug)]
#[command(name = "gatekeeper", version, about)]
struct Cli {
    /// Settings file (YAML, TOML or JSON), layered under the environment
    #[arg(short, long, value_name = "FILE", env = "GATEKEEPER_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report whether a request would be allowed
    Check { action: String, identifier: String },
    /// Record a failed attempt
    Fail { action: String, identifier: String },
    /// Record a successful attempt, resetting all state
    Success { action: String, identifier: String },
    /// Remove any counter or block for an identifier
    Clear { action: String, identifier: String },
    /// Show the thresholds for an action type, or for every configured one
    Config { action: Option<String> },
    /// Report whether the remote store is in use
    Health,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Ack<'a> {
    action_type: &'a str,
    identifier: &'a str,
    cleared: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Thresholds<'a> {
    action_type: &'a str,
    /// False when the action type falls back to the `general` entry
    known: bool,
    #[serde(flatten)]
    config: RateLimitConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    remote_configured: bool,
    healthy: bool,
}

fn init_tracing(config: &GatekeeperConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = GatekeeperConfig::load(cli.config.as_deref())?;
    init_tracing(&config);

    debug!(version = env!("CARGO_PKG_VERSION"), "Starting Gatekeeper");

    let limiter = RateLimiter::from_config(&config).await?;
    info!(
        remote = limiter.store().has_remote(),
        healthy = limiter.is_healthy(),
        "Rate limiter initialized"
    );

    match &cli.command {
        Command::Check { action, identifier } => {
            print_json(&limiter.check_limit(action, identifier).await)?;
        }
        Command::Fail { action, identifier } => {
            print_json(&limiter.record_failed_attempt(action, identifier).await)?;
        }
        Command::Success { action, identifier } => {
            limiter.record_success(action, identifier).await;
            print_json(&Ack {
                action_type: action,
                identifier,
                cleared: true,
            })?;
        }
        Command::Clear { action, identifier } => {
            limiter.clear_limit(action, identifier).await;
            print_json(&Ack {
                action_type: action,
                identifier,
                cleared: true,
            })?;
        }
        Command::Config { action: Some(action) } => {
            let registry = limiter.registry();
            print_json(&Thresholds {
                action_type: action,
                known: registry.is_known(action),
                config: registry.get_config(action),
            })?;
        }
        Command::Config { action: None } => {
            let registry = limiter.registry();
            let mut all: Vec<Thresholds> = registry
                .action_types()
                .into_iter()
                .map(|action_type| Thresholds {
                    action_type,
                    known: true,
                    config: registry.get_config(action_type),
                })
                .collect();
            all.push(Thresholds {
                action_type: GENERAL,
                known: true,
                config: registry.get_config(GENERAL),
            });
            print_json(&all)?;
        }
        Command::Health => {
            print_json(&Health {
                remote_configured: limiter.store().has_remote(),
                healthy: limiter.is_healthy(),
            })?;
        }
    }

    Ok(())
}
