//! Relay command handler

use anyhow::{Context, Result};
use tracing::info;

use snipsync_core::{Config, RelayServer};

use crate::output::Output;

/// Run the relay until Ctrl-C
pub async fn run(config: &Config, bind: Option<String>, output: &Output) -> Result<()> {
    let mut relay_config = config.relay_config();
    if let Some(bind) = bind {
        relay_config.bind_addr = bind;
    }

    let relay = RelayServer::bind(relay_config).await?;
    output.print_relay_started(relay.local_addr()?);

    tokio::select! {
        result = relay.run() => result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Relay shutting down");
            output.print_relay_stats(&relay.stats().await);
            Ok(())
        }
    }
}
