//! Peer transport session
//!
//! Joins the rendezvous for a session ID on the relay and runs the Automerge
//! sync protocol pairwise with every other peer in it, keeping the bound
//! document in step with theirs.
//!
//! Connection failures are only reported as `Connectivity(false)`. There is no
//! reconnect: once the connection is gone the session stays disconnected until
//! the owner tears it down. A transport stopped through `disconnect` reports
//! nothing more, so its owner never sees a stale loss after moving on.
//!
//! Events go out on a bounded queue. When it is full, or nobody is reading,
//! further events are dropped.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::message::{ClientMessage, PeerId, ServerMessage, PROTOCOL_V1};
use super::state::SyncState;
use crate::document::{DocumentError, SharedDocument};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Errors that prevent a transport session from being set up at all
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Session ID must not be empty")]
    EmptySessionId,

    #[error("Invalid relay URL '{0}': expected ws:// or wss://")]
    InvalidRelayUrl(String),
}

/// Commands sent to the transport task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCommand {
    /// Ship local document changes to every peer
    PushChanges,
    /// Leave the rendezvous and stop
    Shutdown,
}

/// Events emitted by the transport task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection to the rendezvous gained or lost
    Connectivity(bool),
    /// The document was reconciled with a peer for the first time
    SyncCompleted(bool),
    /// A peer entered the session
    PeerJoined(PeerId),
    /// A peer left the session
    PeerLeft(PeerId),
}

/// Connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not connected
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Joined the rendezvous
    Connected,
}

/// Configuration for a transport session
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket URL of the relay
    pub relay_url: String,
    /// How long to wait for the relay to accept a join
    pub handshake_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:4444".to_string(),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Handle to a running transport session
pub struct PeerTransport {
    session_id: String,
    peer_id: PeerId,
    command_tx: mpsc::Sender<TransportCommand>,
    status_rx: watch::Receiver<ConnectionStatus>,
    task: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl PeerTransport {
    /// Join the rendezvous for `session_id` and start syncing `doc`
    ///
    /// Only argument problems are returned as errors; network failures are
    /// reported on `event_tx`.
    pub fn connect(
        config: &TransportConfig,
        session_id: &str,
        doc: SharedDocument,
        event_tx: mpsc::Sender<TransportEvent>,
    ) -> Result<Self, TransportError> {
        if session_id.trim().is_empty() {
            return Err(TransportError::EmptySessionId);
        }
        if !(config.relay_url.starts_with("ws://") || config.relay_url.starts_with("wss://")) {
            return Err(TransportError::InvalidRelayUrl(config.relay_url.clone()));
        }

        let peer_id: PeerId = format!("snipsync-{}", &uuid::Uuid::new_v4().to_string()[..8]);
        let (command_tx, command_rx) = mpsc::channel(16);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);

        let task = TransportTask {
            config: config.clone(),
            session_id: session_id.to_string(),
            peer_id: peer_id.clone(),
            doc,
            sync_state: SyncState::new(),
            synced: false,
            stopping: false,
            command_rx,
            event_tx,
            status_tx,
        };

        Ok(Self {
            session_id: session_id.to_string(),
            peer_id,
            command_tx,
            status_rx,
            task: Some(tokio::spawn(task.run())),
            shutdown_timeout: config.handshake_timeout,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Get our peer ID
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Get the current status
    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Subscribe to status changes
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Sender used to request that local changes be shipped
    pub fn command_sender(&self) -> mpsc::Sender<TransportCommand> {
        self.command_tx.clone()
    }

    /// Leave the rendezvous and stop all traffic
    ///
    /// Safe to call when never connected, and more than once.
    pub async fn disconnect(&mut self) {
        let Some(mut task) = self.task.take() else {
            return;
        };

        if self.status() != ConnectionStatus::Connected
            || self.command_tx.try_send(TransportCommand::Shutdown).is_err()
        {
            task.abort();
            debug!(session = %self.session_id, "Transport aborted");
            return;
        }

        match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
            Ok(_) => debug!(session = %self.session_id, "Transport stopped"),
            Err(_) => {
                warn!(session = %self.session_id, "Transport did not stop in time, aborting");
                task.abort();
            }
        }
    }
}

impl Drop for PeerTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// State owned by the spawned transport task
struct TransportTask {
    config: TransportConfig,
    session_id: String,
    peer_id: PeerId,
    doc: SharedDocument,
    sync_state: SyncState,
    /// Whether `SyncCompleted` has been emitted
    synced: bool,
    /// Set once the owner asked us to leave
    stopping: bool,
    command_rx: mpsc::Receiver<TransportCommand>,
    event_tx: mpsc::Sender<TransportEvent>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl TransportTask {
    async fn run(mut self) {
        info!(
            session = %self.session_id,
            peer = %self.peer_id,
            "Connecting to relay {}",
            self.config.relay_url
        );

        if let Err(e) = self.connect_and_sync().await {
            warn!(session = %self.session_id, "Transport session ended: {:#}", e);
        }

        self.set_status(ConnectionStatus::Disconnected);
        if !self.stopping {
            self.emit(TransportEvent::Connectivity(false));
        }
    }

    /// Connect, join, then sync until shutdown or disconnection
    async fn connect_and_sync(&mut self) -> Result<()> {
        let (ws_stream, _response) = tokio::time::timeout(
            self.config.handshake_timeout,
            connect_async(self.config.relay_url.as_str()),
        )
        .await
        .context("Timed out connecting to relay")?
        .context("Failed to connect to relay")?;

        let (mut write, mut read) = ws_stream.split();

        send(&mut write, &ClientMessage::join(&self.peer_id, &self.session_id)).await?;
        let peers = self.wait_for_welcome(&mut read).await?;

        self.set_status(ConnectionStatus::Connected);
        self.emit(TransportEvent::Connectivity(true));
        info!(
            session = %self.session_id,
            peers = peers.len(),
            "Joined session"
        );

        for peer in peers {
            self.send_sync(&peer, &mut write).await?;
        }

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(TransportCommand::PushChanges) => {
                            for peer in self.sync_state.peer_ids() {
                                self.send_sync(&peer, &mut write).await?;
                            }
                        }
                        Some(TransportCommand::Shutdown) | None => {
                            self.stopping = true;
                            send(&mut write, &ClientMessage::leave(&self.peer_id)).await.ok();
                            write.close().await.ok();
                            return Ok(());
                        }
                    }
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            self.handle_message(&data, &mut write).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!(session = %self.session_id, "Relay closed connection");
                            return Ok(());
                        }
                        Some(Err(e)) => {
                            return Err(e).context("Relay connection error");
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Wait for the relay to accept our join
    async fn wait_for_welcome(&self, read: &mut WsRead) -> Result<Vec<PeerId>> {
        let deadline = tokio::time::Instant::now() + self.config.handshake_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                bail!("Timeout waiting for relay. Check that the relay is running.");
            }

            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => match ServerMessage::decode(&data) {
                            Ok(ServerMessage::Welcome { peers, selected_protocol_version, .. }) => {
                                if selected_protocol_version != PROTOCOL_V1 {
                                    bail!("Relay selected unsupported protocol {}", selected_protocol_version);
                                }
                                return Ok(peers);
                            }
                            Ok(ServerMessage::Error { message }) => {
                                bail!("Relay rejected join: {}", message);
                            }
                            Ok(_) => {}
                            Err(e) => debug!("Failed to decode relay message: {}", e),
                        },
                        Some(Ok(Message::Close(_))) | None => {
                            bail!("Relay closed connection during handshake");
                        }
                        Some(Err(e)) => {
                            bail!("Relay connection error: {}", e);
                        }
                        _ => {}
                    }
                }
                _ = tokio::time::sleep(remaining) => {
                    bail!("Timeout waiting for relay. Check that the relay is running.");
                }
            }
        }
    }

    async fn handle_message(&mut self, data: &[u8], write: &mut WsWrite) -> Result<()> {
        match ServerMessage::decode(data) {
            Ok(ServerMessage::PeerJoined { peer_id }) => {
                self.emit(TransportEvent::PeerJoined(peer_id.clone()));
                self.send_sync(&peer_id, write).await?;
                debug!(
                    session = %self.session_id,
                    peers = self.sync_state.peer_count(),
                    "Peer joined: {}",
                    peer_id
                );
            }
            Ok(ServerMessage::PeerLeft { peer_id }) => {
                self.sync_state.remove(&peer_id);
                debug!(
                    session = %self.session_id,
                    peers = self.sync_state.peer_count(),
                    "Peer left: {}",
                    peer_id
                );
                self.emit(TransportEvent::PeerLeft(peer_id));
            }
            Ok(ServerMessage::Sync {
                sender_id, data, ..
            }) => {
                self.receive_sync(&sender_id, &data, write).await?;
            }
            Ok(ServerMessage::Error { message }) => {
                bail!("Relay error: {}", message);
            }
            Ok(ServerMessage::Welcome { .. }) => {}
            Err(e) => debug!("Failed to decode relay message: {}", e),
        }
        Ok(())
    }

    /// Send whatever the sync protocol has for `peer_id`
    async fn send_sync(&mut self, peer_id: &str, write: &mut WsWrite) -> Result<()> {
        let bytes = {
            let mut doc = self.doc.lock().await;
            doc.generate_sync_message(self.sync_state.get_or_create(peer_id))
        };

        if let Some(bytes) = bytes {
            send(write, &ClientMessage::sync(&self.peer_id, peer_id, bytes)).await?;
        }
        Ok(())
    }

    /// Apply a sync message from a peer and answer it
    async fn receive_sync(&mut self, sender_id: &str, data: &[u8], write: &mut WsWrite) -> Result<()> {
        let (response, reconciled) = {
            let mut doc = self.doc.lock().await;
            let peer_state = self.sync_state.get_or_create(sender_id);

            match doc.receive_sync_message(peer_state, data) {
                Ok(true) => debug!(session = %self.session_id, "Document updated by {}", sender_id),
                Ok(false) => {}
                Err(DocumentError::Closed) => return Ok(()),
                Err(e) => {
                    warn!(session = %self.session_id, "Ignoring sync message from {}: {}", sender_id, e);
                    return Ok(());
                }
            }

            let response = doc.generate_sync_message(peer_state);
            let reconciled = response.is_none() || doc.is_reconciled(peer_state);
            (response, reconciled)
        };

        if let Some(bytes) = response {
            send(write, &ClientMessage::sync(&self.peer_id, sender_id, bytes)).await?;
        }

        if reconciled && !self.synced {
            self.synced = true;
            info!(session = %self.session_id, "Initial sync with {} complete", sender_id);
            self.emit(TransportEvent::SyncCompleted(true));
        }
        Ok(())
    }

    fn set_status(&self, status: ConnectionStatus) {
        let _ = self.status_tx.send(status);
    }

    fn emit(&self, event: TransportEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            debug!(session = %self.session_id, "Transport event dropped: {}", e);
        }
    }
}

async fn send(write: &mut WsWrite, message: &ClientMessage) -> Result<()> {
    let bytes = message.encode().context("Failed to encode message")?;
    write
        .send(Message::Binary(bytes))
        .await
        .context("Failed to send to relay")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ReplicatedDocument;

    /// A URL nothing is listening on
    async fn dead_relay_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_session() {
        let (tx, _rx) = mpsc::channel(16);
        let result = PeerTransport::connect(
            &TransportConfig::default(),
            "  ",
            ReplicatedDocument::open().into_shared(),
            tx,
        );
        assert_eq!(result.err(), Some(TransportError::EmptySessionId));
    }

    #[tokio::test]
    async fn test_connect_rejects_non_websocket_url() {
        let (tx, _rx) = mpsc::channel(16);
        let config = TransportConfig {
            relay_url: "http://localhost:4444".to_string(),
            ..TransportConfig::default()
        };
        let result = PeerTransport::connect(&config, "s", ReplicatedDocument::open().into_shared(), tx);
        assert!(matches!(result, Err(TransportError::InvalidRelayUrl(_))));
    }

    #[tokio::test]
    async fn test_unreachable_relay_reports_disconnected() {
        let (tx, mut rx) = mpsc::channel(16);
        let config = TransportConfig {
            relay_url: dead_relay_url().await,
            handshake_timeout: Duration::from_secs(2),
        };
        let transport =
            PeerTransport::connect(&config, "s", ReplicatedDocument::open().into_shared(), tx).unwrap();
        assert!(transport.peer_id().starts_with("snipsync-"));

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(event, Some(TransportEvent::Connectivity(false)));
        assert_eq!(transport.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_events_are_dropped_when_queue_is_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let config = TransportConfig {
            relay_url: dead_relay_url().await,
            handshake_timeout: Duration::from_secs(2),
        };

        let mut first =
            PeerTransport::connect(&config, "s", ReplicatedDocument::open().into_shared(), tx.clone())
                .unwrap();
        let mut second =
            PeerTransport::connect(&config, "s", ReplicatedDocument::open().into_shared(), tx).unwrap();

        // Both tasks finish even though only one event fits
        for transport in [&mut first, &mut second] {
            let task = transport.task.take().unwrap();
            tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .unwrap()
                .unwrap();
        }

        assert_eq!(rx.recv().await, Some(TransportEvent::Connectivity(false)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (tx, _rx) = mpsc::channel(16);
        let config = TransportConfig {
            relay_url: dead_relay_url().await,
            handshake_timeout: Duration::from_secs(2),
        };
        let mut transport =
            PeerTransport::connect(&config, "s", ReplicatedDocument::open().into_shared(), tx).unwrap();

        transport.disconnect().await;
        transport.disconnect().await;
    }
}
