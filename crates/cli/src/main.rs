//! agentmux CLI: the main entry point.
//!
//! Commands:
//! - `serve`:  start every configured agent and run until SIGINT/SIGTERM
//! - `agents`: list configured agents
//! - `check`:  validate the configuration

use std::path::PathBuf;

use agentmux_config::{AppConfig, ConfigError, DEFAULT_CONFIG_FILE, LogFormat, LoggingConfig};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "agentmux",
    about = "agentmux: host many A2A agents, one listener each",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(short, long, global = true, env = "AGENTMUX_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start all configured agents
    Serve,

    /// List configured agents
    Agents,

    /// Validate the configuration file
    Check,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let path = cli.config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let loaded: Result<AppConfig, ConfigError> = AppConfig::load_with_env(&path);
    init_tracing(cli.verbose, loaded.as_ref().ok().map(|c| &c.logging));
    tracing::debug!(path = %path.display(), ok = loaded.is_ok(), "Configuration loaded");

    match cli.command {
        Commands::Serve => commands::serve::run(load(loaded)?).await?,
        Commands::Agents => commands::agents::run(&load(loaded)?),
        Commands::Check => commands::check::run(&path, loaded)?,
    }

    Ok(())
}

fn load(loaded: Result<AppConfig, ConfigError>) -> Result<AppConfig, String> {
    loaded.map_err(|e| format!("Failed to load config: {e}"))
}

/// `RUST_LOG` wins, then `--verbose`, then `logging.level` from the config.
fn init_tracing(verbose: bool, logging: Option<&LoggingConfig>) {
    let level = match (verbose, logging) {
        (true, _) => "debug".to_string(),
        (false, Some(l)) => l.level.clone(),
        (false, None) => "info".to_string(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if logging.is_some_and(|l| l.format == LogFormat::Json) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}
