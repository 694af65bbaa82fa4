//! snipsync CLI
//!
//! Command-line interface for snipsync - live sharing of snippet groups and
//! collections.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use snipsync_core::Config;

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "snipsync")]
#[command(about = "snipsync - Live sharing of snippet groups and collections")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the rendezvous relay
    Relay {
        /// Address to listen on (overrides relay_bind_addr)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Create a session and share this catalog with joiners
    Host {
        /// Session ID to use (random when omitted)
        #[arg(long)]
        session: Option<String>,
        /// Create a group for the session
        #[arg(long)]
        group: Option<String>,
        /// Color of the session group
        #[arg(long, default_value = "blue")]
        color: String,
    },
    /// Join a session and mirror its groups and collections
    Join {
        /// Session ID shared by the host
        session: String,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (relay_url, relay_bind_addr, handshake_timeout_secs,
        /// max_peers_per_session, display_name, log_level)
        key: String,
        /// Configuration value
        value: String,
    },
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    // Config commands work without logging or a valid config
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), config_path, &output);
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    init_logging(&config);

    match cli.command {
        Commands::Relay { bind } => commands::relay::run(&config, bind, &output).await,
        Commands::Host {
            session,
            group,
            color,
        } => commands::session::host(&config, session, group, color, &output).await,
        Commands::Join { session } => commands::session::join(&config, session, &output).await,
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
        Some(ConfigCommands::Path) => commands::config::path(config_path, output),
    }
}

/// Log to stderr, filtered by RUST_LOG or the configured level
fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "snipsync_core={},snipsync={}",
            config.log_level, config.log_level
        ))
    });

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
