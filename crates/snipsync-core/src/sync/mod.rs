//! Peer-to-peer document sync over a rendezvous relay
//!
//! ## Protocol
//!
//! 1. Connect to the relay via WebSocket
//! 2. Send `join` with our peer ID and the session ID
//! 3. Receive `welcome` listing the peers already present
//! 4. Exchange Automerge sync messages pairwise, addressed by peer ID
//! 5. Send `leave` on shutdown
//!
//! ## Usage
//!
//! ```ignore
//! let (events_tx, events_rx) = tokio::sync::mpsc::channel(64);
//! let transport = PeerTransport::connect(&config, "session-1", doc, events_tx)?;
//! ```

mod message;
mod relay;
mod state;
mod transport;

pub use message::{ClientMessage, PeerId, ServerMessage, PROTOCOL_V1};
pub use relay::{RelayConfig, RelayServer, RelayStats};
pub use state::SyncState;
pub use transport::{
    ConnectionStatus, PeerTransport, TransportCommand, TransportConfig, TransportError,
    TransportEvent,
};
