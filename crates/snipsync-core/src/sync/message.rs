//! Sync protocol message types
//!
//! Messages exchanged between peers and the rendezvous relay, CBOR-encoded in
//! binary WebSocket frames. The relay only routes `sync` frames; their payload
//! is an opaque Automerge sync message.

use serde::{Deserialize, Serialize};

/// Peer ID for identifying a participant in a session
pub type PeerId = String;

/// Protocol version
pub const PROTOCOL_V1: &str = "1";

/// CBOR encoding error
pub type EncodeError = ciborium::ser::Error<std::io::Error>;

/// CBOR decoding error
pub type DecodeError = ciborium::de::Error<std::io::Error>;

/// Messages sent by a peer to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Enter the rendezvous for a session
    #[serde(rename = "join")]
    Join {
        #[serde(rename = "senderId")]
        sender_id: PeerId,
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "supportedProtocolVersions")]
        supported_protocol_versions: Vec<String>,
    },

    /// Sync message addressed to one peer
    #[serde(rename = "sync")]
    Sync {
        #[serde(rename = "senderId")]
        sender_id: PeerId,
        #[serde(rename = "targetId")]
        target_id: PeerId,
        /// Automerge sync message bytes
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },

    /// Leave the rendezvous
    #[serde(rename = "leave")]
    Leave {
        #[serde(rename = "senderId")]
        sender_id: PeerId,
    },
}

/// Messages sent by the relay to a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Join accepted; lists the peers already in the session
    #[serde(rename = "welcome")]
    Welcome {
        #[serde(rename = "targetId")]
        target_id: PeerId,
        peers: Vec<PeerId>,
        #[serde(rename = "selectedProtocolVersion")]
        selected_protocol_version: String,
    },

    /// Another peer entered the session
    #[serde(rename = "peer-joined")]
    PeerJoined {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },

    /// Another peer left the session
    #[serde(rename = "peer-left")]
    PeerLeft {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },

    /// Sync message forwarded from another peer
    #[serde(rename = "sync")]
    Sync {
        #[serde(rename = "senderId")]
        sender_id: PeerId,
        #[serde(rename = "targetId")]
        target_id: PeerId,
        /// Automerge sync message bytes
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },

    /// Error from the relay
    #[serde(rename = "error")]
    Error { message: String },
}

impl ClientMessage {
    /// Create a join message
    pub fn join(sender_id: &str, session_id: &str) -> Self {
        ClientMessage::Join {
            sender_id: sender_id.to_string(),
            session_id: session_id.to_string(),
            supported_protocol_versions: vec![PROTOCOL_V1.to_string()],
        }
    }

    /// Create a sync message
    pub fn sync(sender_id: &str, target_id: &str, data: Vec<u8>) -> Self {
        ClientMessage::Sync {
            sender_id: sender_id.to_string(),
            target_id: target_id.to_string(),
            data,
        }
    }

    /// Create a leave message
    pub fn leave(sender_id: &str) -> Self {
        ClientMessage::Leave {
            sender_id: sender_id.to_string(),
        }
    }

    /// Encode message to CBOR bytes
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)?;
        Ok(bytes)
    }

    /// Decode message from CBOR bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        ciborium::from_reader(bytes)
    }
}

impl ServerMessage {
    /// Create an error message
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// Encode message to CBOR bytes
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)?;
        Ok(bytes)
    }

    /// Decode message from CBOR bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        ciborium::from_reader(bytes)
    }
}
