//! Host and join command handlers

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use snipsync_core::{
    AppState, Catalog, CollaborationSession, Config, LocalSource, ReplicationController,
    TransportEvent,
};

use super::host::{self, HostCommand};
use crate::output::Output;

/// Create a session and replicate the catalog edited on stdin
pub async fn host(
    config: &Config,
    session_id: Option<String>,
    group: Option<String>,
    color: String,
    output: &Output,
) -> Result<()> {
    let author = config.author();
    let mut catalog = Catalog::new();
    let group = match group {
        Some(name) => Some(catalog.create_group(&name, vec![author.clone()], &color)?),
        None => None,
    };

    let local = Arc::new(AppState::new());
    catalog.refresh(local.as_ref());

    let session = match session_id {
        Some(id) => CollaborationSession::create(id, group),
        None => CollaborationSession::generate(group),
    };

    let mut controller = ReplicationController::new(config.transport_config(), local.clone());
    let mut events = controller
        .take_events()
        .context("Transport events already taken")?;
    controller
        .start(session.clone())
        .await
        .context("Failed to start session")?;
    output.print_session(&session);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    break;
                };
                match host::parse(&line) {
                    Ok(HostCommand::Quit) => break,
                    Ok(HostCommand::Help) => output.message(host::HELP),
                    Ok(HostCommand::Show) => output.print_state(&local.groups(), &local.collections()),
                    Ok(command) => match host::apply(&mut catalog, command, &author) {
                        Ok(message) => {
                            catalog.refresh(local.as_ref());
                            output.success(&message);
                        }
                        Err(e) => output.error(&e.to_string()),
                    },
                    Err(e) => output.error(&e),
                }
            }
            Some(event) = events.recv() => output.print_event(&event),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    controller.stop().await;
    output.message("Session closed");
    Ok(())
}

/// Join a session and print the replicated state whenever it changes
pub async fn join(config: &Config, session_id: String, output: &Output) -> Result<()> {
    let local = Arc::new(AppState::new());
    let mut groups_rx = local.watch_groups();
    let mut collections_rx = local.watch_collections();

    let session = CollaborationSession::join(session_id);
    let mut controller = ReplicationController::new(config.transport_config(), local.clone());
    let mut events = controller
        .take_events()
        .context("Transport events already taken")?;
    controller
        .start(session.clone())
        .await
        .context("Failed to join session")?;
    output.print_session(&session);

    loop {
        tokio::select! {
            changed = groups_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let groups = groups_rx.borrow_and_update().clone();
                output.print_state(&groups, &local.collections());
            }
            changed = collections_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let collections = collections_rx.borrow_and_update().clone();
                output.print_state(&local.groups(), &collections);
            }
            Some(event) = events.recv() => {
                output.print_event(&event);
                // There is no reconnect, so a lost relay ends the session
                if event == TransportEvent::Connectivity(false) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    controller.stop().await;
    output.message("Left session");
    Ok(())
}
