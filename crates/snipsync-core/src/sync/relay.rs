//! Rendezvous relay
//!
//! Groups WebSocket connections by session ID and forwards addressed `sync`
//! frames between peers of the same session. The relay never looks inside
//! the Automerge payload and keeps no document of its own.
//!
//! Every peer has a bounded outgoing queue. A peer that stops reading until
//! its queue fills is evicted from the session and disconnected.
//!
//! ```text
//! Peer A ──┐                      ┌── Peer A
//!           ├── Session (id) ─────┤
//! Peer B ──┘   peer → sender      └── Peer B
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use super::message::{ClientMessage, PeerId, ServerMessage, PROTOCOL_V1};

type Sessions = Arc<RwLock<HashMap<String, HashMap<PeerId, PeerHandle>>>>;
type RelayWrite = SplitSink<WebSocketStream<TcpStream>, Message>;
type RelayRead = SplitStream<WebSocketStream<TcpStream>>;

/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum peers per session
    pub max_peers_per_session: usize,
    /// How long a new connection may take to send its join
    pub handshake_timeout: Duration,
    /// Frames queued for one peer before it is evicted
    pub peer_queue_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4444".to_string(),
            max_peers_per_session: 32,
            handshake_timeout: Duration::from_secs(10),
            peer_queue_capacity: 256,
        }
    }
}

/// Relay statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_peers: usize,
    pub active_sessions: usize,
    pub forwarded_messages: u64,
    pub evicted_peers: u64,
}

/// A joined peer as seen by the rest of its session
struct PeerHandle {
    queue: mpsc::Sender<Vec<u8>>,
    /// Wakes the peer's connection handler when it is evicted
    kick: Arc<Notify>,
}

impl PeerHandle {
    /// Queue a frame without waiting; false if the queue is full or closed
    fn deliver(&self, bytes: Vec<u8>) -> bool {
        self.queue.try_send(bytes).is_ok()
    }
}

/// Outcome of routing one sync frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Queued,
    UnknownPeer,
    QueueFull,
    Failed,
}

/// The rendezvous relay
pub struct RelayServer {
    config: RelayConfig,
    listener: TcpListener,
    /// session ID → (peer ID → outgoing frame queue)
    sessions: Sessions,
    stats: Arc<RwLock<RelayStats>>,
}

impl RelayServer {
    /// Bind the listening socket
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind relay to {}", config.bind_addr))?;

        Ok(Self {
            config,
            listener,
            sessions: Arc::default(),
            stats: Arc::default(),
        })
    }

    /// Address the relay is listening on
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read relay address")
    }

    /// Snapshot of the relay statistics
    pub async fn stats(&self) -> RelayStats {
        let mut stats = self.stats.read().await.clone();
        let sessions = self.sessions.read().await;
        stats.active_sessions = sessions.len();
        stats.active_peers = sessions.values().map(HashMap::len).sum();
        stats
    }

    /// Accept connections until the listener fails
    pub async fn run(&self) -> Result<()> {
        info!("Relay listening on {}", self.local_addr()?);

        loop {
            let (stream, addr) = self
                .listener
                .accept()
                .await
                .context("Failed to accept connection")?;
            debug!("New TCP connection from {}", addr);

            let sessions = self.sessions.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, sessions, stats, config).await {
                    debug!("Connection from {} ended: {:#}", addr, e);
                }
            });
        }
    }
}

/// Serve one peer from join to leave
async fn handle_connection(
    stream: TcpStream,
    sessions: Sessions,
    stats: Arc<RwLock<RelayStats>>,
    config: RelayConfig,
) -> Result<()> {
    let ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .context("WebSocket handshake failed")?;
    let (mut write, mut read) = ws_stream.split();

    stats.write().await.total_connections += 1;

    let (peer_id, session_id) =
        match tokio::time::timeout(config.handshake_timeout, read_join(&mut read)).await {
            Ok(Ok(join)) => join,
            Ok(Err(e)) => {
                reject(&mut write, &e.to_string()).await;
                return Err(e);
            }
            Err(_) => {
                reject(&mut write, "Timed out waiting for join").await;
                bail!("Timed out waiting for join");
            }
        };

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(config.peer_queue_capacity.max(1));
    let kick = Arc::new(Notify::new());

    let admitted = {
        let mut sessions = sessions.write().await;
        let room = sessions.entry(session_id.clone()).or_default();

        if room.len() >= config.max_peers_per_session {
            Err(format!("Session {} is full", session_id))
        } else if room.contains_key(&peer_id) {
            Err(format!("Peer {} is already in session {}", peer_id, session_id))
        } else {
            // Welcome is queued before any forwarded frame can be
            let welcome = ServerMessage::Welcome {
                target_id: peer_id.clone(),
                peers: room.keys().cloned().collect(),
                selected_protocol_version: PROTOCOL_V1.to_string(),
            }
            .encode()?;
            let _ = tx.try_send(welcome);

            let joined = ServerMessage::PeerJoined {
                peer_id: peer_id.clone(),
            }
            .encode()?;
            for (id, peer) in room.iter() {
                if !peer.deliver(joined.clone()) {
                    debug!("Dropping peer-joined notice for {}", id);
                }
            }

            room.insert(
                peer_id.clone(),
                PeerHandle {
                    queue: tx,
                    kick: kick.clone(),
                },
            );
            Ok(room.len())
        }
    };

    match admitted {
        Ok(count) => info!(session = %session_id, peers = count, "Peer {} joined", peer_id),
        Err(reason) => {
            warn!("Rejected {}: {}", peer_id, reason);
            reject(&mut write, &reason).await;
            return Ok(());
        }
    }

    // The room holds the only sender, so the writer stops once we leave
    let mut writer = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if write.send(Message::Binary(bytes)).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    let mut evicted = false;
    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Binary(data))) => match ClientMessage::decode(&data) {
                    Ok(ClientMessage::Sync {
                        target_id, data, ..
                    }) => {
                        let delivery =
                            forward(&sessions, &stats, &session_id, &peer_id, &target_id, data).await;
                        if delivery == Delivery::QueueFull {
                            evict(&sessions, &stats, &session_id, &target_id).await;
                        }
                    }
                    Ok(ClientMessage::Leave { .. }) => break,
                    Ok(ClientMessage::Join { .. }) => {
                        debug!("Ignoring repeated join from {}", peer_id);
                    }
                    Err(e) => debug!("Failed to decode message from {}: {}", peer_id, e),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Connection error from {}: {}", peer_id, e);
                    break;
                }
            },
            _ = kick.notified() => {
                evicted = true;
                break;
            }
        }
    }

    if evicted {
        // The writer is most likely stuck on a peer that stopped reading
        writer.abort();
        return Ok(());
    }

    leave(&sessions, &session_id, &peer_id).await;
    if tokio::time::timeout(config.handshake_timeout, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
    Ok(())
}

/// Read frames until a valid join arrives
async fn read_join(read: &mut RelayRead) -> Result<(PeerId, String)> {
    while let Some(msg) = read.next().await {
        match msg? {
            Message::Binary(data) => match ClientMessage::decode(&data) {
                Ok(ClientMessage::Join {
                    sender_id,
                    session_id,
                    supported_protocol_versions,
                }) => {
                    if !supported_protocol_versions.iter().any(|v| v == PROTOCOL_V1) {
                        bail!(
                            "Unsupported protocol versions {:?}",
                            supported_protocol_versions
                        );
                    }
                    if session_id.is_empty() || sender_id.is_empty() {
                        bail!("Join requires a session ID and a sender ID");
                    }
                    return Ok((sender_id, session_id));
                }
                Ok(_) => bail!("Expected join message"),
                Err(e) => bail!("Invalid message: {}", e),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
    bail!("Connection closed before join")
}

/// Route a sync payload to one peer of the same session
async fn forward(
    sessions: &Sessions,
    stats: &RwLock<RelayStats>,
    session_id: &str,
    sender_id: &str,
    target_id: &str,
    data: Vec<u8>,
) -> Delivery {
    let sessions = sessions.read().await;
    let Some(target) = sessions.get(session_id).and_then(|room| room.get(target_id)) else {
        debug!(session = %session_id, "Dropping sync for unknown peer {}", target_id);
        return Delivery::UnknownPeer;
    };

    let message = ServerMessage::Sync {
        sender_id: sender_id.to_string(),
        target_id: target_id.to_string(),
        data,
    };
    let bytes = match message.encode() {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to encode sync frame: {}", e);
            return Delivery::Failed;
        }
    };

    match target.queue.try_send(bytes) {
        Ok(()) => {
            stats.write().await.forwarded_messages += 1;
            Delivery::Queued
        }
        Err(mpsc::error::TrySendError::Full(_)) => Delivery::QueueFull,
        Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Failed,
    }
}

/// Remove a peer and tell the rest of its session
///
/// Returns the removed peer, or `None` if it had already gone.
async fn leave(sessions: &Sessions, session_id: &str, peer_id: &str) -> Option<PeerHandle> {
    let mut sessions = sessions.write().await;
    let room = sessions.get_mut(session_id)?;
    let removed = room.remove(peer_id)?;
    info!(session = %session_id, peers = room.len(), "Peer {} left", peer_id);

    if room.is_empty() {
        sessions.remove(session_id);
        return Some(removed);
    }

    if let Ok(bytes) = (ServerMessage::PeerLeft {
        peer_id: peer_id.to_string(),
    })
    .encode()
    {
        for (id, peer) in room.iter() {
            if !peer.deliver(bytes.clone()) {
                debug!("Dropping peer-left notice for {}", id);
            }
        }
    }
    Some(removed)
}

/// Drop a peer whose queue is full and close its connection
async fn evict(sessions: &Sessions, stats: &RwLock<RelayStats>, session_id: &str, peer_id: &str) {
    let Some(peer) = leave(sessions, session_id, peer_id).await else {
        return;
    };
    warn!(session = %session_id, "Evicting {}: outgoing queue is full", peer_id);
    stats.write().await.evicted_peers += 1;
    peer.kick.notify_one();
}

async fn reject(write: &mut RelayWrite, reason: &str) {
    if let Ok(bytes) = ServerMessage::error(reason).encode() {
        let _ = write.send(Message::Binary(bytes)).await;
    }
    let _ = write.close().await;
}
