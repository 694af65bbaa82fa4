//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use snipsync_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "relay_url": config.relay_url,
                    "relay_bind_addr": config.relay_bind_addr,
                    "handshake_timeout_secs": config.handshake_timeout_secs,
                    "max_peers_per_session": config.max_peers_per_session,
                    "display_name": config.display_name,
                    "log_level": config.log_level
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.relay_url);
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  relay_url:              {}", config.relay_url);
            println!("  relay_bind_addr:        {}", config.relay_bind_addr);
            println!("  handshake_timeout_secs: {}", config.handshake_timeout_secs);
            println!("  max_peers_per_session:  {}", config.max_peers_per_session);
            println!(
                "  display_name:           {}",
                config.display_name.as_deref().unwrap_or("(not set)")
            );
            println!("  log_level:              {}", config.log_level);
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

/// Print the config file path
pub fn path(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);

    match output.format {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "path": path.display().to_string() }));
        }
        _ => println!("{}", path.display()),
    }
    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "relay_url" => {
            if !(value.starts_with("ws://") || value.starts_with("wss://")) {
                bail!("relay_url must start with ws:// or wss://");
            }
            config.relay_url = value.to_string();
        }
        "relay_bind_addr" => {
            config.relay_bind_addr = value.to_string();
        }
        "handshake_timeout_secs" => {
            config.handshake_timeout_secs = value
                .parse()
                .context("Invalid value for handshake_timeout_secs. Use a number of seconds.")?;
        }
        "max_peers_per_session" => {
            config.max_peers_per_session = value
                .parse()
                .context("Invalid value for max_peers_per_session. Use a number.")?;
        }
        "display_name" => {
            config.display_name = if value.is_empty() || value == "none" {
                None
            } else {
                Some(value.to_string())
            };
        }
        "log_level" => {
            config.log_level = value.to_string();
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: relay_url, relay_bind_addr, handshake_timeout_secs, \
                 max_peers_per_session, display_name, log_level",
                key
            );
        }
    }
    Ok(())
}
