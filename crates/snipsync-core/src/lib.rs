//! SnipSync Core Library
//!
//! Real-time replication of a snippet organizer's groups and collections
//! between one session creator and any number of joiners.
//!
//! # Architecture
//!
//! - **Automerge**: the per-session replicated document
//! - **Relay**: WebSocket rendezvous that routes sync frames between peers
//! - **Controller**: binds the application's local state to one session,
//!   pushing on the creator and pulling on joiners
//!
//! # Quick Start
//!
//! ```text
//! let local = Arc::new(AppState::new());
//! let mut controller = ReplicationController::new(config.transport_config(), local.clone());
//!
//! controller.start(CollaborationSession::generate(None)).await?;
//! local.set_groups(vec![Group::new("eng", "blue")]);
//! ```
//!
//! # Modules
//!
//! - `replication`: session controller (main entry point)
//! - `document`: Automerge-backed groups/collections document
//! - `sync`: peer transport, wire messages and the relay
//! - `local_state`: the application's observable state
//! - `catalog`: in-memory groups/collections commands
//! - `models`: data structures for groups, collections and snippets
//! - `config`: application configuration

pub mod catalog;
pub mod config;
pub mod document;
pub mod local_state;
pub mod models;
pub mod replication;
pub mod sync;

pub use catalog::{Catalog, CatalogError};
pub use config::Config;
pub use document::{DocumentError, ReplicatedDocument, SharedDocument};
pub use local_state::{AppState, LocalSink, LocalSource, LocalState};
pub use models::{CodeSnippet, CollaborationSession, Collection, Group, Role};
pub use replication::{
    DocumentReader, ReplicationController, ReplicationError, ReplicationStats, SessionState,
};
pub use sync::{
    ConnectionStatus, PeerTransport, RelayConfig, RelayServer, TransportConfig, TransportEvent,
};
